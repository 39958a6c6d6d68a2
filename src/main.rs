fn main() {
    if let Err(err) = conversation_graph::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
