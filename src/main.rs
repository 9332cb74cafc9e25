use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use clap::App;
use tokio::sync::Notify;

use observd::config::Configuration;
use observd::database::{ObservationStore, PostgresStore};
use observd::memory::MemoryStore;
use observd::server::{self, AppState};

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from_yaml(cli_yaml).get_matches();

    let log_configuration_path = matches.value_of("log-config").unwrap_or("resources/log.yml");
    match log4rs::init_file(log_configuration_path, Default::default()) {
        Ok(_) => {},
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration: {}", err);
            exit(-100);
        }
    };

    let configuration_path = matches.value_of("config").unwrap_or("resources/observd.yml");
    let configuration = match Configuration::load(Path::new(configuration_path)) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "observd", "{}", err);
            exit(101);
        }
    };

    let store: Arc<dyn ObservationStore> = match &configuration.database_connection_parameters {
        Some(database_parameters) => match PostgresStore::connect(database_parameters) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                log::error!(target: "observd", "Cannot connect to the database: \'{}\'", err);
                exit(201);
            }
        },
        None => {
            log::warn!(target: "observd", "No database configured, observations are kept in memory only!");
            Arc::new(MemoryStore::new())
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!(target: "observd", "Cannot start the async runtime: \'{}\'", err);
            exit(202);
        }
    };

    let shutdown = Arc::new(Notify::new());
    let shutdown_handler = Arc::clone(&shutdown);
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!(target: "observd", "Termination signal received!");
        shutdown_handler.notify_one();
    }) {
        log::error!(target: "observd", "Cannot install the termination handler: \'{}\'", err);
        exit(203);
    }

    let state = AppState::new(Arc::clone(&store), &configuration.auth_parameters);
    match runtime.block_on(server::serve(&configuration.server_parameters, state, shutdown)) {
        Ok(_) => log::debug!(target: "observd", "Server stopped!"),
        Err(err) => {
            log::error!(target: "observd", "Server failed: \'{}\'", err);
            exit(301);
        }
    };

    // The postgres client owns a runtime of its own and must be dropped outside of ours.
    drop(runtime);
    drop(store);

    log::info!(target: "observd", "Exiting");
    exit(0);
}
