use std::path::PathBuf;

pub const USAGE: &str = "\
usage: wharfd [--config <path>] [--debug] [--once]

  --config <path>  config file (default: $WHARF_CONFIG, then ./wharf.yaml)
  --debug          log at debug level regardless of the configured filter
  --once           run a single reconciliation pass, print the report and exit
  --help           show this message";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub debug: bool,
    pub once: bool,
    pub help: bool,
}

impl Args {
    /// Parse arguments, excluding the program name.
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--debug" => parsed.debug = true,
                "--once" => parsed.once = true,
                "-h" | "--help" => parsed.help = true,
                "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| "--config requires a path".to_string())?;
                    parsed.config = Some(PathBuf::from(path));
                }
                other => {
                    if let Some(path) = other.strip_prefix("--config=") {
                        parsed.config = Some(PathBuf::from(path));
                    } else {
                        return Err(format!("unknown argument '{other}'"));
                    }
                }
            }
        }
        Ok(parsed)
    }
}
