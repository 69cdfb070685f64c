use clap::{Arg, Command};
use log::LevelFilter;
use promptgate::coordinator::Coordinator;
use promptgate::detection::DetectionEngine;
use promptgate::gateway::Gateway;
use promptgate::state::StateStore;
use promptgate::Config;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let matches = Command::new("promptgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Client-side governance agent for third-party AI chat platforms")
        .long_about(
            "promptgate watches drafts composed on monitored AI chat platforms,\n\
             classifies them for sensitive-data exposure before they are sent,\n\
             and offers rewritten alternatives. Submissions are only ever held\n\
             briefly: every failure mode resolves by letting the original through.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/promptgate.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Show usage counters and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats-reset")
                .long("stats-reset")
                .help("Reset usage counters and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("set-identity")
                .long("set-identity")
                .value_name("EMAIL")
                .help("Update the user identity reported in commit records")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("check-health")
                .long("check-health")
                .help("Probe the remote governance service and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("classify-file")
                .long("classify-file")
                .value_name("FILE")
                .help("Classify the text in FILE and print the findings")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Run as a daemon (background process)")
                .action(clap::ArgAction::SetTrue),
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

    let config_path = matches.get_one::<String>("config").unwrap();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        match config.validate() {
            Ok(()) => {
                println!("  Socket: {}", config.socket_path);
                println!("  State:  {}", config.state_path);
                println!("  Service: {}", config.service.url);
                println!("✅ Configuration is valid");
            }
            Err(e) => {
                println!("❌ Configuration validation failed:");
                println!("Error: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(file) = matches.get_one::<String>("classify-file") {
        classify_file(&config, file);
        return;
    }

    if matches.get_flag("stats")
        || matches.get_flag("stats-reset")
        || matches.get_flag("check-health")
        || matches.contains_id("set-identity")
    {
        run_status_command(&config, &matches).await;
        return;
    }

    if matches.get_flag("daemon") {
        daemonize();
    }

    log::info!("Starting promptgate agent...");

    let (handle, _coordinator) = match Coordinator::spawn(&config) {
        Ok(spawned) => spawned,
        Err(e) => {
            log::error!("Failed to start coordinator: {e}");
            process::exit(1);
        }
    };

    let gateway = Arc::new(Gateway::new(
        handle,
        Duration::from_secs(config.timeouts.decision_seconds),
    ));
    let socket_path = config.socket_path.clone();

    tokio::select! {
        result = gateway.run(&socket_path) => {
            if let Err(e) = result {
                log::error!("Gateway error: {e}");
                process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown signal received");
        }
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

async fn run_status_command(config: &Config, matches: &clap::ArgMatches) {
    // A running agent owns the durable record, so reads and writes go
    // through its socket; touching the file underneath it would be
    // undone by the next persisted cycle. The file paths below are the
    // fallback for when nothing is listening.
    let live = promptgate::status::LiveStatus::connect(&config.socket_path).await;
    let store = StateStore::new(&config.state_path);

    if matches.get_flag("stats-reset") {
        let outcome = match live {
            Some(mut agent) => agent.reset_stats().await,
            None => promptgate::status::reset_stats(&store),
        };
        match outcome {
            Ok(()) => println!("✅ Usage counters reset"),
            Err(e) => {
                println!("❌ Failed to reset counters: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(email) = matches.get_one::<String>("set-identity") {
        let outcome = match live {
            Some(mut agent) => agent.set_identity(email).await,
            None => promptgate::status::set_identity(&store, email),
        };
        match outcome {
            Ok(()) => println!("✅ Identity updated to {email}"),
            Err(e) => {
                println!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    let (counters, settings) = match live {
        Some(mut agent) => match agent.stats().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                println!("❌ Failed to query running agent: {e}");
                process::exit(1);
            }
        },
        None => match store.load() {
            Ok(state) => (state.counters, state.settings),
            Err(e) => {
                println!("❌ Failed to read agent state: {e}");
                process::exit(1);
            }
        },
    };

    if matches.get_flag("check-health") {
        match promptgate::status::check_health(&settings).await {
            Ok(true) => println!("✅ Service is healthy: {}", settings.service_url),
            Ok(false) => {
                println!("❌ Service is unreachable: {}", settings.service_url);
                process::exit(1);
            }
            Err(e) => {
                println!("❌ {e}");
                process::exit(1);
            }
        }
        return;
    }

    promptgate::status::print_stats(&counters, &settings);
}

fn classify_file(config: &Config, path: &str) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("❌ Error reading file: {e}");
            process::exit(1);
        }
    };

    let engine = DetectionEngine::new(config.detection.min_text_length);
    let result = engine.classify(&text);

    println!("🧪 Classifying: {path}");
    println!();
    if result.is_clean() {
        println!("✅ No findings — tier none");
        return;
    }
    println!("🚨 Overall tier: {:?}", result.tier);
    for finding in &result.findings {
        let excerpt: String = text[finding.start..finding.end].chars().take(40).collect();
        println!(
            "  - {:?} [{:?}] at {}..{}: {excerpt}",
            finding.category, finding.tier, finding.start, finding.end
        );
    }
}

/// Detach into the background: double fork, new session, stdio to
/// /dev/null, PID file for the rc system.
fn daemonize() {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::io::AsRawFd;

        log::info!("Starting promptgate in daemon mode...");

        match unsafe { libc::fork() } {
            -1 => {
                log::error!("Failed to fork process");
                process::exit(1);
            }
            0 => {}
            _ => process::exit(0),
        }

        if unsafe { libc::setsid() } == -1 {
            log::error!("Failed to create new session");
            process::exit(1);
        }

        unsafe {
            libc::signal(libc::SIGHUP, libc::SIG_IGN);
        }

        match unsafe { libc::fork() } {
            -1 => {
                log::error!("Failed to second fork");
                process::exit(1);
            }
            0 => {}
            _ => process::exit(0),
        }

        if let Ok(root_path) = std::ffi::CString::new("/") {
            if unsafe { libc::chdir(root_path.as_ptr()) } == -1 {
                log::warn!("Failed to change working directory to /");
            }
        }

        unsafe {
            libc::umask(0);
        }

        if let Ok(dev_null) = OpenOptions::new().read(true).write(true).open("/dev/null") {
            let null_fd = dev_null.as_raw_fd();
            unsafe {
                libc::dup2(null_fd, 0);
                libc::dup2(null_fd, 1);
                libc::dup2(null_fd, 2);
            }
            std::mem::forget(dev_null);
        }

        let pid = unsafe { libc::getpid() };
        let pid_file_path = "/var/run/promptgate.pid";
        if let Err(e) = std::fs::write(pid_file_path, pid.to_string()) {
            log::warn!("Failed to write PID file: {e}");
        } else {
            log::info!("PID file written: {pid_file_path} ({pid})");
        }

        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Received shutdown signal, cleaning up...");
            if std::path::Path::new(pid_file_path).exists() {
                if let Err(e) = std::fs::remove_file(pid_file_path) {
                    log::warn!("Failed to remove PID file: {e}");
                }
            }
            std::process::exit(0);
        }) {
            log::warn!("Failed to set signal handler: {e}");
        }

        log::info!("Daemon mode initialization complete");
    }

    #[cfg(not(unix))]
    {
        log::warn!("Daemon mode not supported on this platform, running in foreground");
    }
}
