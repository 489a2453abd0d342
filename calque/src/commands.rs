use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("calque")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("calque")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("discover")
                .about(
                    "Walk the site breadth-first from the root URL and print the discovered \
                page tree without downloading anything.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The root URL of the site to discover")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-d --"depth" <LEVELS>)
                        .required(false)
                        .help("Maximum discovery depth; pages at this depth stay unexpanded leaves")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"manifest" <PATH>)
                        .required(false)
                        .help("Write the discovered graph manifest to this file")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"dot" <PATH>)
                        .required(false)
                        .help("Write the discovered graph in DOT form to this file")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"user-agent" <STRING>)
                        .required(false)
                        .help("User agent presented to the site"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("30"),
                ),
        )
        .subcommand(
            command!("mirror")
                .about(
                    "Discover the site, download every page through the worker pool and \
                rewrite all internal links into a self-contained static tree.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The root URL of the site to mirror")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Root directory of the mirrored tree")
                        .default_value("./mirror"),
                )
                .arg(
                    arg!(-w --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of isolated worker processes in the download pool.")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4"),
                )
                .arg(
                    arg!(-d --"depth" <LEVELS>)
                        .required(false)
                        .help("Maximum discovery depth")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    arg!(-c --"cookie" <NAME_VALUE>)
                        .required(false)
                        .help("Session cookie as name=value; repeatable")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"retries" <COUNT>)
                        .required(false)
                        .help("How many times a task lost to a worker crash is requeued")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    arg!(--"no-respawn")
                        .required(false)
                        .help("Do not replace crashed worker processes")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"user-agent" <STRING>)
                        .required(false)
                        .help("User agent presented to the site"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("30"),
                ),
        )
        .subcommand(
            command!("rewrite")
                .about(
                    "Re-run the link-rewrite pass over an existing mirror using its saved \
                graph manifest.",
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(true)
                        .help("Root directory of a previously mirrored tree"),
                ),
        )
        .subcommand(
            command!("worker")
                .about("Internal: run as a download worker process")
                .hide(true)
                .arg(
                    arg!(--"user-agent" <STRING>)
                        .required(false)
                        .help("User agent presented to the site"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("30"),
                ),
        )
}
