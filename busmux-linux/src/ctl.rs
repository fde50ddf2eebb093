use std::path::PathBuf;

use clap::Parser;
use tokio::net::UnixStream;

use crate::{
    control::{read_json, write_json, Op, Request, Response},
    initialize_logging_parse_config,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Show or store a busmux attribute", long_about = None)]
pub(crate) struct Args {
    /// Configuration file to use
    #[clap(long = "config", short = 'c', default_value = "/etc/busmux/busmux.toml")]
    config: PathBuf,

    /// Device owning the attribute, e.g. the master interface or `mcp9902`
    device: String,

    /// Attribute group, e.g. `dsa` or `hwmon`
    group: String,

    attribute: String,

    /// Text to store. The attribute is shown when omitted.
    value: Option<String>,
}

impl Args {
    fn request(&self) -> Request {
        Request {
            device: self.device.clone(),
            group: self.group.clone(),
            attribute: self.attribute.clone(),
            op: match &self.value {
                Some(value) => Op::Store(value.clone()),
                None => Op::Show,
            },
        }
    }
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = Args::parse();

    let config =
        initialize_logging_parse_config(&options.config, Some(log::LevelFilter::Warn)).await;

    let control_path = match config.observability.control_path {
        Some(path) => path,
        None => {
            eprintln!(
                "A control socket path must be configured using the control-path option \
                 in the [observability] section of the configuration"
            );
            std::process::exit(1);
        }
    };

    let mut stream = UnixStream::connect(&control_path).await?;
    write_json(&mut stream, &options.request()).await?;

    let mut buffer = Vec::new();
    match read_json(&mut stream, &mut buffer).await? {
        Response::Ok(text) => {
            if options.value.is_none() {
                print!("{text}");
            }
            Ok(())
        }
        Response::Error { kind, message } => {
            eprintln!(
                "{}/{}/{}: {message} ({kind})",
                options.device, options.group, options.attribute
            );
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_and_store() {
        let args = Args::try_parse_from(["busmux-ctl", "eth0", "dsa", "pvlan"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/busmux/busmux.toml"));
        assert_eq!(args.request().op, Op::Show);

        let args = Args::try_parse_from([
            "busmux-ctl",
            "-c",
            "/tmp/busmux.toml",
            "mcp9902",
            "hwmon",
            "temp1_max",
            "85000",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/tmp/busmux.toml"));
        let request = args.request();
        assert_eq!(request.device, "mcp9902");
        assert_eq!(request.op, Op::Store("85000".to_owned()));
    }

    #[test]
    fn attribute_is_required() {
        assert!(Args::try_parse_from(["busmux-ctl", "eth0", "dsa"]).is_err());
    }
}
