use calque::commands::command_argument_builder;
use calque::handlers;
use tracing_subscriber::EnvFilter;

const BANNER: &str = r#"
  calque — static mirrors of script-rendered sites
"#;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // The worker talks the pool protocol on stdout; its logs must go to
    // stderr, and it gets no banner.
    if let Some(("worker", sub_matches)) = chosen_command.subcommand() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
        if let Err(e) = handlers::handle_worker(sub_matches).await {
            eprintln!("worker failed: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    if !quiet {
        println!("{}", BANNER);
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner.
        return;
    }

    tracing_subscriber::fmt::init();

    let result = match chosen_command.subcommand() {
        Some(("discover", sub_matches)) => handlers::handle_discover(sub_matches).await,
        Some(("mirror", sub_matches)) => handlers::handle_mirror(sub_matches).await,
        Some(("rewrite", sub_matches)) => handlers::handle_rewrite(sub_matches),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}
