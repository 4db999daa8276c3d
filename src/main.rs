use convnet_mnist::cli::{AppArgs, HELP};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_args = match AppArgs::parse() {
        Ok(app_args) => app_args,
        Err(err) => {
            log::error!("{err}");
            eprintln!("{HELP}");
            std::process::exit(2);
        }
    };
    if app_args.help {
        println!("{HELP}");
        return;
    }

    if let Err(err) = convnet_mnist::run(&app_args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}
