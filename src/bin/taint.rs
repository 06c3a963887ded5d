// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The main routine of `taint`.
//!
//! Loads an SSA program produced by a frontend, builds the call graph from
//! the configured entry function and either runs a one-shot check or drops
//! into an interactive shell.

use anyhow::{anyhow, bail, Context, Result};
use log::*;
use std::env;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use rustaint::builder::CallGraphBuilder;
use rustaint::descriptor::DescriptorSet;
use rustaint::graph::call_graph::CallGraph;
use rustaint::graph::path::paths_to;
use rustaint::ssa::analysis_context::AnalysisContext;
use rustaint::ssa::program::Program;
use rustaint::taint;
use rustaint::util::mem_watcher::MemoryWatcher;
use rustaint::util::options::AnalysisOptions;
use rustaint::util::{call_graph_stat, dot, results_dumper};

struct Session {
    ctx: AnalysisContext,
    graph: CallGraph,
}

fn main() {
    // Get any options specified via the TAINT_FLAGS environment variable.
    let mut options = AnalysisOptions::default();
    let taint_flags = env::var("TAINT_FLAGS").unwrap_or_default();
    let taint_args: Vec<String> = serde_json::from_str(&taint_flags).unwrap_or_default();
    let mut inputs = options.parse_from_args(&taint_args[..], true);

    // Let arguments supplied on the command line override the environment.
    let args = env::args().collect::<Vec<_>>();
    inputs.extend(options.parse_from_args(&args[1..], false));

    if env::var("TAINT_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("TAINT_LOG")
            .write_style("TAINT_LOG_STYLE");
        env_logger::init_from_env(e);
    } else {
        env_logger::Builder::new()
            .parse_filters(options.log_level.as_filter_str())
            .init();
    }
    info!("Taint Options: {:?}", options);

    let exit_code = match run(options, inputs) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(options: AnalysisOptions, inputs: Vec<String>) -> Result<()> {
    let mut session = match inputs.iter().find(|arg| !arg.starts_with('-')) {
        // Loading errors on the command line are unrecoverable.
        Some(input) => Some(load(input, None, &options)?),
        None => None,
    };

    let one_shot =
        !options.interactive && !options.sources.is_empty() && !options.sinks.is_empty();
    if one_shot {
        let session = session
            .as_ref()
            .ok_or_else(|| anyhow!("no input program to check"))?;
        run_check(
            session,
            DescriptorSet::new(options.sources.iter().cloned()),
            DescriptorSet::new(options.sinks.iter().cloned()),
        );
        return Ok(());
    }

    repl(&options, &mut session)
}

/// Loads a program and builds its call graph from the entry function.
fn load(input: &str, entry: Option<&str>, options: &AnalysisOptions) -> Result<Session> {
    let program = Program::from_json_file(Path::new(input))
        .with_context(|| format!("loading {}", input))?;
    let ctx = AnalysisContext::new(program, options.clone());

    let entry_name = entry
        .map(str::to_string)
        .or_else(|| {
            if options.entry_func.is_empty() {
                None
            } else {
                Some(options.entry_func.clone())
            }
        })
        .unwrap_or_else(|| "main.main".to_string());
    let root = ctx
        .program
        .func_by_qualified_name(&entry_name)
        .ok_or_else(|| anyhow!("entry function {} not found", entry_name))?;

    let candidates = ctx.program.all_functions();
    let (graph, err) = CallGraphBuilder::new(&ctx).build(root, &candidates);
    if let Some(err) = err {
        bail!("call graph construction failed: {}", err);
    }
    info!(
        "loaded {}: {} nodes, {} edges from entry {}",
        input,
        graph.node_count(),
        graph.edge_count(),
        entry_name
    );

    if options.dump_stats {
        let mut writer = BufWriter::new(std::io::stdout());
        call_graph_stat::call_graph_stat(&ctx, &graph, &mut writer);
        let _ = writer.flush();
    }
    Ok(Session { ctx, graph })
}

fn run_check(session: &Session, sources: DescriptorSet, sinks: DescriptorSet) {
    let mut mem_watcher = MemoryWatcher::new();
    mem_watcher.start();

    let (results, err) = taint::check(&session.ctx, &session.graph, &sources, &sinks);
    if let Some(err) = err {
        warn!("check returned early: {}", err);
    }
    let mut writer = BufWriter::new(std::io::stdout());
    results_dumper::dump_check_report(&session.ctx, &session.graph, &results, &mut writer);
    let _ = writer.flush();
    results_dumper::dump_results(&session.ctx, &session.graph, &results);

    mem_watcher.stop();
}

/// The interactive shell: `load <target> [entry]`, `cg [path]`, `nodes`,
/// `callpath <pattern>`, `check <source> <sink>`, `clear`, `exit`.
fn repl(options: &AnalysisOptions, session: &mut Option<Session>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("taint> ");
        std::io::stdout().flush()?;
        let line = match lines.next() {
            Some(line) => line?,
            // EOF exits the shell.
            None => return Ok(()),
        };
        let words = match shellwords::split(&line) {
            Ok(words) => words,
            Err(e) => {
                eprintln!("parse error: {}", e);
                continue;
            }
        };
        let mut words = words.iter().map(String::as_str);
        match words.next() {
            None => continue,
            Some("exit") | Some("quit") => return Ok(()),
            Some("clear") => {
                *session = None;
            }
            Some("load") => match words.next() {
                Some(target) => match load(target, words.next(), options) {
                    Ok(loaded) => *session = Some(loaded),
                    Err(e) => eprintln!("load failed: {:#}", e),
                },
                None => eprintln!("usage: load <target> [entry]"),
            },
            Some("cg") => match session.as_ref() {
                Some(session) => {
                    let rendered = dot::render(&session.graph, &session.ctx);
                    match words.next() {
                        Some(path) => std::fs::write(path, rendered)?,
                        None => print!("{}", rendered),
                    }
                }
                None => eprintln!("no program loaded"),
            },
            Some("nodes") => match session.as_ref() {
                Some(session) => {
                    let mut nodes: Vec<_> = session.graph.nodes().collect();
                    nodes.sort();
                    for node in nodes {
                        println!(
                            "{}\t{}",
                            node.index(),
                            session.graph.node_func(node).qualified_name(&session.ctx)
                        );
                    }
                }
                None => eprintln!("no program loaded"),
            },
            Some("callpath") => match (session.as_ref(), words.next()) {
                (Some(session), Some(pattern)) => {
                    match paths_to(&session.graph, &session.ctx, pattern) {
                        Ok(paths) => print_paths(session, &paths),
                        Err(e) => eprintln!("{}", e),
                    }
                }
                (None, _) => eprintln!("no program loaded"),
                (_, None) => eprintln!("usage: callpath <pattern>"),
            },
            Some("check") => match (session.as_ref(), words.next(), words.next()) {
                (Some(session), Some(source), Some(sink)) => {
                    run_check(
                        session,
                        DescriptorSet::new([source]),
                        DescriptorSet::new([sink]),
                    );
                }
                (None, _, _) => eprintln!("no program loaded"),
                _ => eprintln!("usage: check <source> <sink>"),
            },
            Some(other) => eprintln!("unknown command: {}", other),
        }
    }
}

fn print_paths(session: &Session, paths: &[Vec<rustaint::graph::call_graph::CgEdgeId>]) {
    for path in paths {
        if path.is_empty() {
            println!("(unreferenced match)");
            continue;
        }
        let mut chain: Vec<String> = Vec::with_capacity(path.len() + 1);
        for (i, edge) in path.iter().enumerate() {
            if let Some((from, to)) = session.graph.edge_endpoints(*edge) {
                if i == 0 {
                    chain.push(session.graph.node_func(from).qualified_name(&session.ctx));
                }
                chain.push(session.graph.node_func(to).qualified_name(&session.ctx));
            }
        }
        println!("{}", chain.join(" -> "));
    }
}
