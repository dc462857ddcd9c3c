use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "news-geocoder",
    version,
    about = "Resolve street addresses in local news and attach map coordinates"
)]
pub struct Cli {
    /// Defaults to `run` when omitted.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process the unresolved backlog until interrupted.
    Run,
    /// Resolve (and geocode) a single text without touching the article store.
    Resolve(ResolveArgs),
    /// Return articles marked NOT_FOUND to the backlog.
    Requeue(RequeueArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long, default_value = "")]
    pub text: String,

    #[arg(long, default_value_t = false)]
    pub no_geocode: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RequeueArgs {
    /// Only this article; all NOT_FOUND articles when omitted.
    #[arg(long)]
    pub id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["news-geocoder"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "news-geocoder",
            "resolve",
            "--title",
            "Пожар на улице Ленина, 5",
            "--no-geocode",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Resolve(args)) => {
                assert_eq!(args.title, "Пожар на улице Ленина, 5");
                assert!(args.text.is_empty());
                assert!(args.no_geocode);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["news-geocoder", "requeue", "--id", "12"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Requeue(RequeueArgs { id: Some(12) }))
        ));
    }
}
