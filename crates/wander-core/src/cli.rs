use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wander",
    version,
    about = "Wander: things to do in the city",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Category id to include; repeat for several. None means all.
    #[arg(long = "category", short = 'c')]
    pub categories: Vec<String>,

    /// Quick filter id (free, today, weekend, or a configured tag filter).
    #[arg(long = "quick", short = 'f')]
    pub quick: Vec<String>,

    #[arg(long = "search", short = 's')]
    pub search: Option<String>,

    /// popular, newest, price_low_high or price_high_low.
    #[arg(long = "sort")]
    pub sort: Option<String>,

    /// all, unique-experiences or date-ideas.
    #[arg(long = "section", default_value = "all")]
    pub section: String,

    /// Only show liked activities.
    #[arg(long = "liked")]
    pub liked: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ActivityFields {
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub price: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub date: Option<String>,
    #[arg(long)]
    pub time: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long = "map")]
    pub map_link: Option<String>,
    #[arg(long = "contact")]
    pub contact_info: Option<String>,
    #[arg(long = "instagram")]
    pub instagram_link: Option<String>,
    #[arg(long = "tickets")]
    pub ticket_link: Option<String>,
    #[arg(long = "category")]
    pub categories: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List activities matching the given filters.
    List {
        #[command(flatten)]
        filters: ListArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print filtered activities as JSON.
    Export {
        #[command(flatten)]
        filters: ListArgs,
    },
    Show {
        id: String,
    },
    Share {
        id: String,
    },
    /// Toggle the liked state of an activity.
    Like {
        id: String,
    },
    Favorites,
    Categories,
    Tags,
    Add {
        #[arg(long)]
        title: String,
        #[command(flatten)]
        fields: ActivityFields,
    },
    /// Change fields with FIELD=VALUE pairs (wire column names).
    Modify {
        id: String,
        #[arg(required = true)]
        changes: Vec<String>,
    },
    Delete {
        id: String,
    },
    /// Import an event page saved as HTML ("-" reads stdin).
    Import {
        source: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    Contact {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        message: String,
    },
    DismissInstall,
}

/// Quiet flags win over verbose ones; `RUST_LOG` wins over both.
fn default_log_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        (0, _) => "trace",
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let level = default_log_level(verbose, quiet);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| anyhow!("cannot build log filter {level:?}: {e}"))?,
    };

    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init()
    {
        debug!(error = %err, "tracing already initialized");
    }
    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` tokens out of the
/// argument list so clap never sees them.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, default_log_level, preprocess_args};

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "wander",
            "rc.color=off",
            "list",
            "rc.default.sort:newest",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["wander", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.default.sort".to_string(), "newest".to_string()),
            ]
        );
    }

    #[test]
    fn list_flags_parse() {
        let cli = GlobalCli::parse_from(args(&[
            "wander", "-vv", "list", "-f", "free", "-f", "weekend", "--search", "jazz",
            "--category", "music", "--sort", "newest",
        ]));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Command::List { filters, json }) => {
                assert_eq!(filters.quick, vec!["free", "weekend"]);
                assert_eq!(filters.categories, vec!["music"]);
                assert_eq!(filters.search.as_deref(), Some("jazz"));
                assert_eq!(filters.sort.as_deref(), Some("newest"));
                assert_eq!(filters.section, "all");
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(default_log_level(0, 0), "warn");
        assert_eq!(default_log_level(3, 0), "trace");
        assert_eq!(default_log_level(2, 1), "warn");
        assert_eq!(default_log_level(0, 2), "error");
    }
}
