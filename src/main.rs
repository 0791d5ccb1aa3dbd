// src/main.rs
fn main() {
    env_logger::init();

    match rafter::cli::run() {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", e.user_friendly_message());
            std::process::exit(e.exit_code());
        }
    }
}
