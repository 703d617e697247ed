//! Command line parsing.

use std::{ffi::OsString, fmt, path::PathBuf};

use clap::{value_parser, Arg, ArgAction, ArgMatches};

use crate::idct::DctMethod;

const TEMPLATE: &str = "\
usage: {name} [options] <jpeg_file>

options:
{options}

accepts only 8-bit non-hierarchical JPEG files
";

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Decode the JPEG on the CPU every frame.
    pub cpu: bool,
    /// Upload and draw the planes every frame.
    pub gpu: bool,
    pub dct: DctMethod,
    /// Rewind one decompressor instead of creating a new one every frame.
    pub reuse_decoder: bool,
    /// Frame (0-based) after whose decode all plane samples are printed.
    pub dump_frame: Option<u64>,
    /// Every positional argument, in order. Only the last file is used.
    pub files: Vec<PathBuf>,
}

/// Reason for printing the usage text instead of running.
#[derive(Debug)]
pub struct UsageRequest {
    message: Option<String>,
}

impl UsageRequest {
    /// Diagnostic to print above the usage text, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for UsageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or("usage requested"))
    }
}

impl std::error::Error for UsageRequest {}

fn command() -> clap::Command {
    clap::Command::new(env!("CARGO_PKG_NAME"))
        .disable_help_flag(true)
        .disable_version_flag(true)
        .help_template(TEMPLATE)
        .arg(
            Arg::new("help")
                .short('h')
                .long("help")
                .action(ArgAction::SetTrue)
                .help("Print this help and exit"),
        )
        .arg(
            Arg::new("no-cpu")
                .long("no-cpu")
                .action(ArgAction::SetTrue)
                .help("Skip the CPU decode; the GPU re-uploads the previous samples"),
        )
        .arg(
            Arg::new("no-gpu")
                .long("no-gpu")
                .action(ArgAction::SetTrue)
                .help("Skip the GPU upload and draw; measure decode throughput only"),
        )
        .arg(
            Arg::new("dct")
                .long("dct")
                .value_name("fast|float")
                .value_parser(["fast", "float"])
                .default_value("fast")
                .help("IDCT used by the CPU decode"),
        )
        .arg(
            Arg::new("reuse-decoder")
                .long("reuse-decoder")
                .action(ArgAction::SetTrue)
                .help("Read the headers once and rewind the decoder every frame"),
        )
        .arg(
            Arg::new("dump-frame")
                .long("dump-frame")
                .value_name("N")
                .value_parser(value_parser!(u64))
                .help("Print every plane's samples after decoding frame N"),
        )
        .arg(
            Arg::new("jpeg_file")
                .action(ArgAction::Append)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
}

/// Returns the usage text.
pub fn usage() -> String {
    command().render_help().to_string()
}

impl Options {
    /// Parses the process arguments (including the program name).
    ///
    /// Returns an error when the usage text should be printed instead: for `-h`/`--help`, for
    /// invalid arguments, and when no file was given.
    pub fn parse<I, T>(args: I) -> Result<Self, UsageRequest>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args).map_err(|e| UsageRequest {
            message: Some(first_line(&e.to_string())),
        })?;
        if matches.get_flag("help") {
            return Err(UsageRequest { message: None });
        }
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self, UsageRequest> {
        let files: Vec<PathBuf> = matches
            .get_many::<PathBuf>("jpeg_file")
            .map(|files| files.cloned().collect())
            .unwrap_or_default();
        if files.is_empty() {
            return Err(UsageRequest { message: None });
        }

        let dct = match matches.get_one::<String>("dct").map(String::as_str) {
            Some("float") => DctMethod::Float,
            _ => DctMethod::IntegerFast,
        };

        Ok(Self {
            cpu: !matches.get_flag("no-cpu"),
            gpu: !matches.get_flag("no-gpu"),
            dct,
            reuse_decoder: matches.get_flag("reuse-decoder"),
            dump_frame: matches.get_one::<u64>("dump-frame").copied(),
            files,
        })
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, UsageRequest> {
        Options::parse(std::iter::once("hyjpeg").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let options = parse(&["a.jpg"]).unwrap();
        assert_eq!(
            options,
            Options {
                cpu: true,
                gpu: true,
                dct: DctMethod::IntegerFast,
                reuse_decoder: false,
                dump_frame: None,
                files: vec!["a.jpg".into()],
            }
        );
    }

    #[test]
    fn flags() {
        let options = parse(&[
            "--no-cpu",
            "a.jpg",
            "--no-gpu",
            "--dct",
            "float",
            "--reuse-decoder",
            "--dump-frame",
            "3",
            "b.jpg",
        ])
        .unwrap();
        assert!(!options.cpu);
        assert!(!options.gpu);
        assert_eq!(options.dct, DctMethod::Float);
        assert!(options.reuse_decoder);
        assert_eq!(options.dump_frame, Some(3));
        assert_eq!(options.files, [PathBuf::from("a.jpg"), PathBuf::from("b.jpg")]);
    }

    #[test]
    fn help_and_missing_file() {
        for args in [&["-h"][..], &["--help"], &["--help", "a.jpg"], &[], &["--no-cpu"]] {
            let err = parse(args).unwrap_err();
            assert_eq!(err.message(), None, "{args:?}");
        }
    }

    #[test]
    fn invalid_arguments() {
        for args in [&["--bogus", "a.jpg"][..], &["--dct", "slow", "a.jpg"], &["--dump-frame", "x"]] {
            let err = parse(args).unwrap_err();
            let message = err.message().unwrap();
            assert!(message.starts_with("error:"), "{message}");
        }
    }

    #[test]
    fn usage_text() {
        let usage = usage();
        assert!(usage.starts_with("usage: hyjpeg [options] <jpeg_file>"), "{usage}");
        for flag in ["-h, --help", "--no-cpu", "--no-gpu", "--dct", "--reuse-decoder", "--dump-frame"] {
            assert!(usage.contains(flag), "missing {flag} in {usage}");
        }
        assert!(usage.trim_end().ends_with("accepts only 8-bit non-hierarchical JPEG files"));
    }
}
