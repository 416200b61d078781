use quotaguard::{config::LimiterConfig, init_tracing, run};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    init_tracing();

    // Config file path from the command line, or defaults throughout
    let config = match env::args().nth(1) {
        Some(path) => match LimiterConfig::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", path, e);
                eprintln!("Usage: quotaguard [config_file]");
                process::exit(1);
            }
        },
        None => LimiterConfig::default(),
    };

    if let Err(e) = run(config).await {
        eprintln!("Limiter error: {}", e);
        process::exit(1);
    }
}
