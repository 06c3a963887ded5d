// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Analysis options.

use itertools::Itertools;

use clap::error::ErrorKind;
use clap::{Arg, Command};
use rustc_tools_util::VersionInfo;

const TAINT_USAGE: &str = r#"taint [OPTIONS] [INPUT] -- [FRONTEND OPTIONS]"#;

/// The version information from Cargo.toml.
fn version() -> &'static str {
    let version_info = rustc_tools_util::get_version_info!();
    let version = format!(
        "v{}.{}.{}",
        version_info.major, version_info.minor, version_info.patch
    );
    Box::leak(version.into_boxed_str())
}

/// Logging verbosity of the analysis session.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LogLevel {
    Silent,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command<'static> {
    // We could put this into lazy_static! with a Mutex around, but we really do not expect
    // to construct this more then once per regular program run.
    let parser = Command::new("taint")
        .no_binary_name(true)
        .override_usage(TAINT_USAGE)
        .version(version())
        .arg(Arg::new("entry-func-name")
            .long("entry-func")
            .takes_value(true)
            .help("The name of the entry function from which the analysis begins."))
        .arg(Arg::new("source")
            .long("source")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("A source descriptor (repeatable): a type or function producing attacker-controllable data."))
        .arg(Arg::new("sink")
            .long("sink")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("A sink descriptor (repeatable): a function or method dangerous under tainted arguments."))
        .arg(Arg::new("max-walk-depth")
            .long("max-walk-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(u32))
            .default_value("6")
            .help("The recursion depth limit of the call-graph priority walk."))
        .arg(Arg::new("log-level")
            .long("log-level")
            .takes_value(true)
            .value_parser(["silent", "info", "debug", "trace"])
            .default_value("info")
            .help("Logging verbosity."))
        .arg(Arg::new("dump-stats")
            .long("dump-stats")
            .takes_value(false)
            .help("Dump call graph statistics after construction."))
        .arg(Arg::new("call-graph-output")
            .long("dump-call-graph")
            .takes_value(true)
            .help("Dump the call graph in DOT format to the output file."))
        .arg(Arg::new("graph-csv-output")
            .long("dump-graph-csv")
            .takes_value(true)
            .help("Dump the call graph edges as CSV to the output file."))
        .arg(Arg::new("metadata-csv-output")
            .long("dump-metadata-csv")
            .takes_value(true)
            .help("Dump per-node metadata as CSV to the output file."))
        .arg(Arg::new("results-output")
            .long("dump-results")
            .takes_value(true)
            .help("Dump the check report to the output file."))
        .arg(Arg::new("interactive")
            .long("interactive")
            .short('i')
            .takes_value(false)
            .help("Start the interactive shell after loading the input."))
        .arg(Arg::new("INPUT")
            .multiple_values(true)
            .help("The SSA program file to be analyzed.")
        );
    parser
}

#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    pub entry_func: String,
    pub sources: Vec<String>,
    pub sinks: Vec<String>,
    pub max_walk_depth: u32,
    pub log_level: LogLevel,

    pub dump_stats: bool,
    pub call_graph_output: Option<String>,
    pub graph_csv_output: Option<String>,
    pub metadata_csv_output: Option<String>,
    pub results_output: Option<String>,
    pub interactive: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            entry_func: String::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            max_walk_depth: 6,
            log_level: LogLevel::Info,
            dump_stats: false,
            call_graph_output: None,
            graph_csv_output: None,
            metadata_csv_output: None,
            results_output: None,
            interactive: false,
        }
    }
}

impl AnalysisOptions {
    /// Parses options from a list of strings. Any content beyond the leftmost
    /// `--` token is left to the frontend and returned (excluding the token),
    /// together with the positional inputs.
    pub fn parse_from_args(&mut self, args: &[String], from_env: bool) -> Vec<String> {
        let mut taint_args_end = args.len();
        let mut frontend_args_start = 0;
        if let Some((p, _)) = args.iter().find_position(|s| s.as_str() == "--") {
            taint_args_end = p;
            frontend_args_start = p + 1;
        }
        let taint_args = &args[0..taint_args_end];
        let matches = if !from_env && frontend_args_start == 0 {
            // The arguments may not be intended for the analyser and may get
            // here via some tool, so do not report errors here.
            match make_options_parser().try_get_matches_from(taint_args.iter()) {
                Ok(matches) => {
                    frontend_args_start = args.len();
                    matches
                }
                Err(e) => match e.kind() {
                    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                        eprintln!("{e}");
                        return args.to_vec();
                    }
                    ErrorKind::UnknownArgument => {
                        // Not ours; hand everything to the frontend untouched.
                        return args.to_vec();
                    }
                    _ => {
                        e.exit();
                    }
                },
            }
        } else {
            // This will display error diagnostics for invalid options.
            match make_options_parser().try_get_matches_from(taint_args.iter()) {
                Ok(matches) => {
                    if frontend_args_start == 0 {
                        frontend_args_start = args.len();
                    }
                    matches
                }
                Err(e) => {
                    e.exit();
                }
            }
        };

        if let Some(s) = matches.get_one::<String>("entry-func-name") {
            self.entry_func = s.clone();
        }
        if let Some(sources) = matches.get_many::<String>("source") {
            self.sources.extend(sources.cloned());
        }
        if let Some(sinks) = matches.get_many::<String>("sink") {
            self.sinks.extend(sinks.cloned());
        }
        if let Some(depth) = matches.get_one::<u32>("max-walk-depth") {
            self.max_walk_depth = *depth;
        }
        if let Some(level) = matches.get_one::<String>("log-level") {
            self.log_level = match level.as_str() {
                "silent" => LogLevel::Silent,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                "trace" => LogLevel::Trace,
                _ => unreachable!(),
            };
        }

        self.dump_stats = matches.contains_id("dump-stats");
        self.interactive = matches.contains_id("interactive");
        self.call_graph_output = matches.get_one::<String>("call-graph-output").cloned();
        self.graph_csv_output = matches.get_one::<String>("graph-csv-output").cloned();
        self.metadata_csv_output = matches.get_one::<String>("metadata-csv-output").cloned();
        self.results_output = matches.get_one::<String>("results-output").cloned();

        // If the user provided the input path before the `--` token, hand it
        // back together with the frontend arguments.
        let mut frontend_args = args[frontend_args_start..].to_vec();
        if let Some(input) = matches.get_many::<String>("INPUT") {
            frontend_args.extend(input.cloned())
        }

        frontend_args
    }
}
