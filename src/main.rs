use std::path::PathBuf;

use snapfeed::app::RunOptions;

enum Cli {
    Exit,
    Run(RunOptions),
}

fn main() {
    let opts = match parse_cli_flags() {
        Ok(Cli::Exit) => return,
        Ok(Cli::Run(opts)) => opts,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    if let Err(err) = snapfeed::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_cli_flags() -> Result<Cli, String> {
    let mut opts = RunOptions::default();
    let mut saw_flag = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("snapfeed {}", snapfeed::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "snapfeed — Vertical video feed in the terminal, played through mpv.\n\n  --config <path>      Read configuration from <path>\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\nKeys: j/k or arrows to move, m mute, l like, r retry, q quit."
                );
                saw_flag = true;
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--config needs a path".to_string())?;
                opts.config_file = Some(PathBuf::from(path));
            }
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    opts.config_file = Some(PathBuf::from(path));
                }
            }
        }
    }
    if saw_flag {
        Ok(Cli::Exit)
    } else {
        Ok(Cli::Run(opts))
    }
}
