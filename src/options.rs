use clap::Parser;

/// ECU Bridge - polls an APsystems ECU and decodes its telemetry
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Query once, print the snapshot as JSON and exit
    #[clap(short = 'o', long = "once")]
    pub once: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let options = Options::parse_from(["ecu-bridge", "-c", "ecu.yaml", "--once", "-t", "30"]);
        assert_eq!(options.config_file, "ecu.yaml");
        assert!(options.once);
        assert_eq!(options.runtime, Some(30));
    }

    #[test]
    fn defaults() {
        let options = Options::parse_from(["ecu-bridge"]);
        assert_eq!(options.config_file, "config.yaml");
        assert!(!options.once);
        assert_eq!(options.runtime, None);
    }
}
