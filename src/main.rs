fn main() {
    if let Err(err) = csv_forecast::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
