use clap::{App, Arg, SubCommand};
use log::debug;
use shmstore::{Item, ItemValue, Result, SharedStore, StorageError, DEFAULT_SEGMENT_SIZE};

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let name_arg = Arg::with_name("name")
        .short("n")
        .long("name")
        .value_name("NAME")
        .help("Name of the store")
        .required(true)
        .takes_value(true);
    let key_arg = Arg::with_name("key")
        .short("k")
        .long("key")
        .value_name("KEY")
        .help("Item key")
        .required(true)
        .takes_value(true);

    let matches = App::new("shmstore-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Process-shared typed key-value store CLI")
        .subcommand(
            SubCommand::with_name("create")
                .about("Create a new store")
                .arg(name_arg.clone())
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("BYTES")
                        .help("Capacity in bytes")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("destroy")
                .about("Remove a store's backing object")
                .arg(name_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("set")
                .about("Set an item")
                .arg(name_arg.clone())
                .arg(key_arg.clone())
                .arg(
                    Arg::with_name("value")
                        .short("v")
                        .long("value")
                        .value_name("VALUE")
                        .help("Item value (ignored for --kind null)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("kind")
                        .long("kind")
                        .value_name("KIND")
                        .help("Value kind: auto, bool, double, text, json, null")
                        .default_value("auto")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("tag")
                        .short("t")
                        .long("tag")
                        .value_name("TAG")
                        .help("Free-form tag")
                        .default_value("")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Get an item")
                .arg(name_arg.clone())
                .arg(key_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("remove")
                .about("Remove an item")
                .arg(name_arg.clone())
                .arg(key_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("clear")
                .about("Remove every item")
                .arg(name_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("incr")
                .about("Atomically increment a numeric item under the store lock")
                .arg(name_arg.clone())
                .arg(key_arg.clone())
                .arg(
                    Arg::with_name("by")
                        .long("by")
                        .value_name("DELTA")
                        .help("Increment amount")
                        .default_value("1")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("info")
                .about("Show store statistics")
                .arg(name_arg.clone()),
        )
        .get_matches();

    match matches.subcommand() {
        ("create", Some(sub)) => {
            let name = sub.value_of("name").unwrap();
            let size = match sub.value_of("size") {
                Some(raw) => raw.parse::<usize>().map_err(|_| {
                    StorageError::invalid_parameter("size", "invalid size format")
                })?,
                None => DEFAULT_SEGMENT_SIZE,
            };
            let store = SharedStore::create(name, size)?;
            println!("created store '{}' with {} bytes", store.name(), size);
            Ok(())
        }
        ("destroy", Some(sub)) => {
            let name = sub.value_of("name").unwrap();
            SharedStore::destroy(name)?;
            println!("destroyed store '{}'", name);
            Ok(())
        }
        ("set", Some(sub)) => {
            let name = sub.value_of("name").unwrap();
            let key = sub.value_of("key").unwrap();
            let kind = sub.value_of("kind").unwrap();
            let tag = sub.value_of("tag").unwrap();
            let raw = sub.value_of("value").unwrap_or("");

            let value = parse_value(kind, raw)?;
            debug!("set {}[{}] = {:?}", name, key, value);

            let store = SharedStore::open(name)?;
            store.set_item(key, Item::new(value, tag))?;
            println!("ok");
            Ok(())
        }
        ("get", Some(sub)) => {
            let name = sub.value_of("name").unwrap();
            let key = sub.value_of("key").unwrap();

            let store = SharedStore::open(name)?;
            let item = store.get_item(key)?;
            println!("kind:  {}", item.kind().name());
            println!("value: {}", render_value(&item.value));
            println!("tag:   {}", item.tag);
            Ok(())
        }
        ("remove", Some(sub)) => {
            let name = sub.value_of("name").unwrap();
            let key = sub.value_of("key").unwrap();

            let store = SharedStore::open(name)?;
            store.remove_item(key)?;
            println!("removed '{}'", key);
            Ok(())
        }
        ("clear", Some(sub)) => {
            let name = sub.value_of("name").unwrap();

            let store = SharedStore::open(name)?;
            store.clear()?;
            println!("cleared store '{}'", name);
            Ok(())
        }
        ("incr", Some(sub)) => {
            let name = sub.value_of("name").unwrap();
            let key = sub.value_of("key").unwrap();
            let by: f64 = sub
                .value_of("by")
                .unwrap()
                .parse()
                .map_err(|_| StorageError::invalid_parameter("by", "invalid number"))?;

            let store = SharedStore::open(name)?;
            store.lock();
            let result = (|| {
                let next = store.double_or(key, 0.0) + by;
                store.set_item(key, next)?;
                Ok::<f64, StorageError>(next)
            })();
            store.unlock();

            println!("{}", result?);
            Ok(())
        }
        ("info", Some(sub)) => {
            let name = sub.value_of("name").unwrap();

            let store = SharedStore::open(name)?;
            let stats = store.stats();
            println!("store:           {}", store.name());
            println!("capacity:        {} bytes", stats.capacity);
            println!("free:            {} bytes", stats.free_bytes);
            println!("items:           {}", stats.item_count);
            println!("directory slots: {}", stats.directory_slots);
            Ok(())
        }
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_value(kind: &str, raw: &str) -> Result<ItemValue> {
    match kind {
        "bool" => match raw {
            "true" => Ok(ItemValue::Bool(true)),
            "false" => Ok(ItemValue::Bool(false)),
            _ => Err(StorageError::invalid_parameter(
                "value",
                "expected 'true' or 'false'",
            )),
        },
        "double" => raw
            .parse::<f64>()
            .map(ItemValue::Double)
            .map_err(|_| StorageError::invalid_parameter("value", "invalid number")),
        "text" => Ok(ItemValue::Text(raw.to_string())),
        "json" => serde_json::from_str(raw)
            .map(ItemValue::Json)
            .map_err(|e| StorageError::invalid_parameter("value", e.to_string())),
        "null" => Ok(ItemValue::Null),
        "auto" => Ok(match raw {
            "true" => ItemValue::Bool(true),
            "false" => ItemValue::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(number) => ItemValue::Double(number),
                Err(_) => ItemValue::Text(raw.to_string()),
            },
        }),
        other => Err(StorageError::invalid_parameter(
            "kind",
            format!("unknown kind '{}'", other),
        )),
    }
}

fn render_value(value: &ItemValue) -> String {
    match value {
        ItemValue::Bool(v) => v.to_string(),
        ItemValue::Double(v) => v.to_string(),
        ItemValue::Text(v) => v.clone(),
        ItemValue::Json(v) => v.to_string(),
        ItemValue::Null => "null".to_string(),
    }
}
