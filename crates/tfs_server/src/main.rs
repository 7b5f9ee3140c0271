use std::{env, process};

fn main() {
    env_logger::init();

    let args = env::args().collect::<Vec<String>>();
    if args.len() != 2 {
        eprintln!("Usage: {} <server_pipe_path>", args[0]);
        process::exit(1);
    }

    if let Err(err) = tfs_server::run(&args[1]) {
        log::error!("server failed: {err}");
        process::exit(1);
    }
}
