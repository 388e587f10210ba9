fn main() {
    ptalk::boot::init_logger();

    let matches = ptalk::cli::parse_args();
    if let Err(err) = ptalk::cli::run(&matches) {
        log::error!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
