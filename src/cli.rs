use std::path::PathBuf;

use clap::Parser;
use log::warn;

use crate::errors::{Error, Result};

#[derive(Parser, Debug)]
#[clap(
    name = "sealbundle",
    version,
    about = "Encrypts and uploads either ADGs or deployment events"
)]
pub struct Args {
    /// Bearer token string or path to a file containing it
    #[clap(short = 'j', long)]
    pub jwt: Option<String>,

    /// Override the project UUID (else taken from the token)
    #[clap(long)]
    pub uuid: Option<String>,

    /// Directory of ADG files to scan & upload
    #[clap(long)]
    pub adg: Option<PathBuf>,

    /// JSON file containing deployment events
    #[clap(long)]
    pub deployment_events: Option<PathBuf>,

    /// Only encrypt; do not upload
    #[clap(short = 'e', long)]
    pub encrypt_only: bool,

    /// Skip encrypting with a key, producing a clear-text bundle.
    /// Combine with -e to build a local clear-text bundle.
    #[clap(long)]
    pub skip_key: bool,

    /// Non-sensitive comment recorded inside the bundle
    #[clap(long)]
    pub comment_no_sensitive_info: Option<String>,

    /// Directory to write the sealed bundle (default: system temp directory)
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Bundle format version: 2 (default; gzip-compressed tar) or 1 (legacy; plain tar)
    #[clap(long, default_value_t = 2)]
    pub bundle_format_version: u32,

    /// Additional builder args in key=value form (e.g. --extra-args="--skip-key,--encrypt-only")
    #[clap(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub extra_args: Option<Vec<String>>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Fold `--extra-args` tokens back into the parsed options.
    ///
    /// Tokens are either `key=value` or bare; a bare value-expecting
    /// option consumes the following token as its value when that token
    /// does not start with a dash.
    pub fn apply_extra_args(&mut self) -> Result<()> {
        let tokens = match self.extra_args.take() {
            Some(tokens) => tokens,
            None => return Ok(()),
        };

        let mut i = 0;
        while i < tokens.len() {
            let raw = tokens[i].trim();
            i += 1;
            if raw.is_empty() {
                continue;
            }

            let (key, mut value) = match raw.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (raw.to_string(), None),
            };

            if value.is_none() && expects_value(&key) && i < tokens.len() {
                let next = tokens[i].trim();
                if !next.is_empty() && !next.starts_with('-') {
                    value = Some(next.to_string());
                    i += 1;
                }
            }

            // the comment option may be passed as a bare flag
            if key == "--comment-no-sensitive-info" && value.is_none() {
                value = Some(String::new());
            }

            self.apply_extra_arg(&key, value)?;
        }
        Ok(())
    }

    fn apply_extra_arg(&mut self, key: &str, value: Option<String>) -> Result<()> {
        match key {
            "--skip-key" => self.skip_key = true,
            "--encrypt-only" | "-e" => self.encrypt_only = true,
            "--jwt" | "-j" => self.jwt = Some(required(key, value, "token or file path")?),
            "--uuid" => self.uuid = Some(required(key, value, "project id")?),
            "--adg" => self.adg = Some(PathBuf::from(required(key, value, "directory path")?)),
            "--deployment-events" => {
                self.deployment_events = Some(PathBuf::from(required(key, value, "file path")?))
            }
            "--output" => self.output = Some(PathBuf::from(required(key, value, "directory path")?)),
            "--comment-no-sensitive-info" => self.comment_no_sensitive_info = value,
            "--comment" => {
                self.comment_no_sensitive_info = Some(value.ok_or_else(|| {
                    Error::BadInput("--comment requires a value".to_string())
                })?)
            }
            "--bundle-format-version" => {
                let text = required(key, value, "1 or 2")?;
                self.bundle_format_version = text.parse().map_err(|_| {
                    Error::BadInput(format!("invalid bundle format version: {text}"))
                })?;
            }
            other => warn!("Unknown extra arg: {}", other),
        }
        Ok(())
    }
}

fn required(key: &str, value: Option<String>, what: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::BadInput(format!("{key} requires a value ({what})")))
}

fn expects_value(key: &str) -> bool {
    matches!(
        key,
        "--jwt"
            | "-j"
            | "--uuid"
            | "--adg"
            | "--deployment-events"
            | "--output"
            | "--comment"
            | "--comment-no-sensitive-info"
            | "--bundle-format-version"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("sealbundle").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.bundle_format_version, 2);
        assert!(!args.skip_key);
        assert!(!args.encrypt_only);
        assert!(args.extra_args.is_none());
    }

    #[test]
    fn extra_args_set_flags() {
        let mut args = parse(&["--extra-args", "--skip-key,--encrypt-only"]);
        args.apply_extra_args().unwrap();
        assert!(args.skip_key);
        assert!(args.encrypt_only);
    }

    #[test]
    fn extra_args_key_value_form() {
        let mut args = parse(&["--extra-args", "--bundle-format-version=1,--uuid=abc"]);
        args.apply_extra_args().unwrap();
        assert_eq!(args.bundle_format_version, 1);
        assert_eq!(args.uuid.as_deref(), Some("abc"));
    }

    #[test]
    fn extra_args_value_in_following_token() {
        let mut args = parse(&["--extra-args", "--output,/tmp/out,--skip-key"]);
        args.apply_extra_args().unwrap();
        assert_eq!(args.output.as_deref(), Some(std::path::Path::new("/tmp/out")));
        assert!(args.skip_key);
    }

    #[test]
    fn comment_flag_form_maps_to_empty_string() {
        let mut args = parse(&["--extra-args", "--comment-no-sensitive-info,--skip-key"]);
        args.apply_extra_args().unwrap();
        assert_eq!(args.comment_no_sensitive_info.as_deref(), Some(""));
        assert!(args.skip_key);
    }

    #[test]
    fn jwt_without_value_is_rejected() {
        let mut args = parse(&["--extra-args", "--jwt"]);
        let err = args.apply_extra_args().unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[test]
    fn unknown_extra_arg_is_ignored() {
        let mut args = parse(&["--extra-args", "--frobnicate,--skip-key"]);
        args.apply_extra_args().unwrap();
        assert!(args.skip_key);
    }

    #[test]
    fn bad_version_in_extra_args_is_rejected() {
        let mut args = parse(&["--extra-args", "--bundle-format-version=two"]);
        assert!(matches!(
            args.apply_extra_args(),
            Err(Error::BadInput(_))
        ));
    }
}
