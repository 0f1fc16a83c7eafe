use origin_server::config;
use origin_server::error::Result;
use origin_server::server::Server;

const DEFAULT_CONFIG_PATH: &str = "conf/default.conf";

fn main() {
    env_logger::init();

    let arg = std::env::args().nth(1);
    if matches!(arg.as_deref(), Some("-h") | Some("--help")) {
        print_usage();
        return;
    }

    if let Err(e) = run(arg) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Usage: origin_server [CONFIG_FILE]");
    println!();
    println!("Runs the HTTP origin server with the given configuration file.");
    println!("If CONFIG_FILE is omitted, {DEFAULT_CONFIG_PATH} is used.");
}

fn run(arg: Option<String>) -> Result<()> {
    let config_path = arg.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let app_config = config::load(&config_path)?;
    let mut server = Server::new(app_config)?;
    server.run()
}
