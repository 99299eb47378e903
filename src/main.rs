use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use mystic_alerts::config::Settings;
use mystic_alerts::pipeline::EventPipeline;
use mystic_alerts::player::PlayerLookup;
use mystic_alerts::query;
use mystic_alerts::reference::ReferenceIndex;
use mystic_alerts::registry::FilterRegistry;
use mystic_alerts::webhook::WebhookSink;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use url::Url;

#[tokio::main]
async fn main() {
    let matches = Command::new("mystic-alerts")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Watches the live mystic feed and alerts a webhook when filters match")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file path")
                .default_value("settings.json"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a default settings file and exit")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-query")
                .long("test-query")
                .value_name("QUERY")
                .help("Compile a filter query and print its clause breakdown")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("add-filter")
                .long("add-filter")
                .value_name("QUERY")
                .help("Add a filter (the query text is its name)")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("remove-filter")
                .long("remove-filter")
                .value_name("QUERY")
                .help("Remove a filter by name")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("set-filter-alert")
                .long("set-filter-alert")
                .value_names(["QUERY", "TEXT"])
                .help("Set (or, with no TEXT, clear) a filter's alert line")
                .num_args(1..)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("set-alert")
                .long("set-alert")
                .value_name("TEXT")
                .help("Set the global alert template text")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("set-webhook")
                .long("set-webhook")
                .value_name("URL")
                .help("Set the delivery webhook URL")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("list-filters")
                .long("list-filters")
                .value_name("PAGE")
                .help("List filters, ten per page")
                .num_args(0..=1)
                .default_missing_value("1")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("enable")
                .long("enable")
                .help("Enable alerting")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("disable")
                .long("disable")
                .help("Disable alerting")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap());

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        let path = PathBuf::from(generate_path);
        if let Err(e) = Settings::default().save(&path) {
            eprintln!("❌ Error writing settings: {e:#}");
            process::exit(1);
        }
        println!("✅ Default settings written to {generate_path}");
        return;
    }

    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ Error loading settings: {e:#}");
            process::exit(1);
        }
    };

    if let Some(query_text) = matches.get_one::<String>("test-query") {
        // Offline check: class names resolve against the live reference data
        // at daemon startup, so here they compile as literal enchantments.
        let compiled = query::compile(query_text, &ReferenceIndex::empty());
        println!("✅ `{query_text}` compiles to {} clause(s):", compiled.clauses().len());
        for clause in compiled.clauses() {
            println!("   {clause:?}");
        }
        return;
    }

    // Registry mutations never persist predicates, so the command surface
    // compiles against an empty index instead of fetching reference data.
    let admin_index = ReferenceIndex::empty();
    let mut registry = FilterRegistry::new(settings, &config_path, &admin_index);

    if let Some(name) = matches.get_one::<String>("add-filter") {
        match registry.add(name, &admin_index) {
            Ok(()) => println!("✅ Added filter `{name}`"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(name) = matches.get_one::<String>("remove-filter") {
        match registry.remove(name) {
            Ok(removed) => println!("✅ Removed {removed} filter(s) named `{name}`"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(values) = matches.get_many::<String>("set-filter-alert") {
        let values: Vec<&String> = values.collect();
        let name = values[0];
        let alert = if values.len() > 1 {
            Some(
                values[1..]
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        } else {
            None
        };
        match registry.set_alert(name, alert) {
            Ok(()) => println!("✅ Alert for `{name}` set"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(text) = matches.get_one::<String>("set-alert") {
        match registry.set_global_alert(text.clone()) {
            Ok(()) => println!("✅ Global alert text set"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(raw_url) = matches.get_one::<String>("set-webhook") {
        match Url::parse(raw_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => {
                eprintln!("❌ Not an http(s) URL: {raw_url}");
                process::exit(1);
            }
        }
        match registry.set_webhook_url(raw_url.clone()) {
            Ok(()) => println!("✅ Webhook set"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(page) = matches.get_one::<String>("list-filters") {
        let page: usize = page.parse().unwrap_or(1).max(1);
        println!("{}", registry.format_page(page));
        return;
    }

    if matches.get_flag("enable") {
        if registry.settings().webhook_url.is_none() {
            eprintln!("❌ Set a webhook first (--set-webhook)");
            process::exit(1);
        }
        match registry.set_enabled(true) {
            Ok(()) => println!("✅ Enabled"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("disable") {
        match registry.set_enabled(false) {
            Ok(()) => println!("✅ Disabled"),
            Err(e) => {
                eprintln!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = run_daemon(registry.settings().clone(), config_path).await {
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

async fn run_daemon(settings: Settings, config_path: PathBuf) -> anyhow::Result<()> {
    // First run writes the defaults back so the file exists for the admin
    // commands to mutate.
    settings.save(&config_path)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("mystic-alerts/", env!("CARGO_PKG_VERSION")))
        .build()?;

    log::info!("fetching reference data from {}", settings.reference_url);
    let index = ReferenceIndex::fetch(&client, &settings.reference_url).await?;
    log::info!("reference index ready ({} classes)", index.class_count());

    let webhook_url = match &settings.webhook_url {
        Some(url) => url.clone(),
        None => anyhow::bail!("no webhook configured; run --set-webhook first"),
    };
    if !settings.enabled {
        log::warn!("alerting is disabled; events will be watched but not dispatched");
    }

    let player_api_url = settings.player_api_url.clone();
    let registry = FilterRegistry::new(settings, &config_path, &index);
    log::info!("loaded {} filter(s)", registry.len());

    let lookup = PlayerLookup::new(&player_api_url)?;
    let sink = WebhookSink::new(&webhook_url)?;
    let pipeline = EventPipeline::new(registry, lookup, sink);
    pipeline.run().await
}
