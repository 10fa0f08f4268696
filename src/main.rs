//! FlowPilot CLI Entry Point
//!
//! Composes a plan from a free-text request (or loads one from YAML) and
//! drives it, printing stage progress as it happens.
//!
//! # Usage
//!
//! ```bash
//! # Guided walkthrough of the default request
//! flowpilot "add an item to my cart"
//!
//! # Autonomous run of the failing scenario, one manual retry
//! flowpilot --mode autonomous --manual-retries 1 "add an orange to my cart"
//!
//! # Run a plan file without real-time pacing, emitting JSON snapshots
//! flowpilot --plan checkout.yaml --instant --json
//! ```

use std::io::Write;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use flowpilot::execution::{
    run_to_idle_with, Driven, Engine, EngineOutcome, EngineSnapshot, ModePolicy, PhaseStatus,
    RunOutcome, RunPhase, Stage, StepStatus, SyntheticClock, WorkflowAggregator,
};
use flowpilot::workflow::composer::GREETING;
use flowpilot::workflow::{compose_response, load_plan, Mode, Plan, Step};
use flowpilot::{APP_NAME, VERSION};

/// Request used when none is given.
const DEFAULT_REQUEST: &str = "Add an item to my cart";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    request: String,
    mode: Mode,
    plan_path: Option<String>,
    instant: bool,
    json: bool,
    manual_retries: u32,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST.to_string(),
            mode: Mode::Guided,
            plan_path: None,
            instant: false,
            json: false,
            manual_retries: 0,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Paced Execution Engine for Automation Walkthroughs");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowpilot [OPTIONS] [REQUEST]");
    println!();
    println!("Arguments:");
    println!("  [REQUEST]             What to test (default: \"{}\")", DEFAULT_REQUEST);
    println!();
    println!("Options:");
    println!("  --mode MODE           guided (default) or autonomous");
    println!("  --plan PATH           Run a YAML plan instead of composing one");
    println!("  --instant             Skip real-time pacing");
    println!("  --json                Print a JSON snapshot after every transition");
    println!("  --manual-retries N    Retry a failed run up to N times (default: 0)");
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
    println!();
    println!("Examples:");
    println!("  flowpilot \"add an item to my cart\"");
    println!("  flowpilot --mode autonomous \"add an orange to my cart\"");
    println!("  flowpilot --plan checkout.yaml --instant --json");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut request_words: Vec<String> = Vec::new();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--instant" => {
                config.instant = true;
            }
            "--json" => {
                config.json = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--mode" => {
                i += 1;
                if i >= args.len() {
                    return Err("--mode requires 'guided' or 'autonomous'".to_string());
                }
                config.mode = args[i].parse()?;
            }
            "--plan" => {
                i += 1;
                if i >= args.len() {
                    return Err("--plan requires a path argument".to_string());
                }
                config.plan_path = Some(args[i].clone());
            }
            "--manual-retries" => {
                i += 1;
                if i >= args.len() {
                    return Err("--manual-retries requires a number argument".to_string());
                }
                config.manual_retries = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid manual retry count: {}", args[i]))?;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => request_words.push(arg.clone()),
        }
        i += 1;
    }

    if !request_words.is_empty() {
        config.request = request_words.join(" ");
    }

    Ok(config)
}

/// Writes engine and aggregator snapshots as they change.
struct Progress<W: Write> {
    out: W,
    json: bool,
    last: Option<EngineSnapshot>,
    last_phase: Option<usize>,
}

impl<W: Write> Progress<W> {
    fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            last: None,
            last_phase: None,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: impl std::fmt::Display) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            error!("Failed to write progress: {}", e);
        }
    }

    fn write_json<T: serde::Serialize>(&mut self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.line(json),
            Err(e) => error!("Failed to serialize snapshot: {}", e),
        }
    }

    /// Forgets the previous engine snapshot, e.g. after a manual retry.
    fn reset(&mut self) {
        self.last = None;
    }

    fn engine(&mut self, snapshot: &EngineSnapshot) {
        if self.json {
            self.write_json(snapshot);
            return;
        }
        self.print_engine_changes(snapshot);
    }

    fn aggregator(&mut self, aggregator: &WorkflowAggregator) {
        let snapshot = aggregator.snapshot();

        // The transition that finishes a phase also activates the next one,
        // so the finished engine never shows up in the aggregator snapshot.
        if let Some(previous) = self.last_phase.filter(|p| *p != snapshot.active_index) {
            if let Some(finished) = aggregator.engine(previous) {
                self.engine(&finished.snapshot());
            }
        }

        if self.json {
            self.last_phase = Some(snapshot.active_index);
            self.write_json(&snapshot);
            return;
        }

        if self.last_phase != Some(snapshot.active_index) {
            self.last_phase = Some(snapshot.active_index);
            self.last = None;
            if let Some(phase) = snapshot.phases.get(snapshot.active_index) {
                let header = format!(
                    "{} {}/{}: {}",
                    "Phase".bold(),
                    snapshot.active_index + 1,
                    snapshot.phases.len(),
                    phase.title.bold()
                );
                self.line("");
                self.line(header);
            }
        }

        if let Some(engine) = &snapshot.engine {
            self.print_engine_changes(engine);
        }
    }

    fn print_engine_changes(&mut self, snapshot: &EngineSnapshot) {
        let (previous_statuses, previous_log) = match &self.last {
            Some(last) if last.log.len() <= snapshot.log.len() => {
                (last.statuses.clone(), last.log.len())
            }
            _ => (vec![StepStatus::Pending; snapshot.statuses.len()], 0),
        };

        for (i, (stage, status)) in snapshot.stages().enumerate() {
            if previous_statuses.get(i) != Some(&status) {
                self.line(stage_line(stage, status));
            }
        }

        for entry in &snapshot.log[previous_log..] {
            let goal = format!(
                "      {} {}",
                format!("Step {}:", entry.sequence_number).dimmed(),
                entry.goal
            );
            self.line(goal);
            self.line(format!("        {}", entry.action.dimmed()));
        }

        if let Some(reason) = &snapshot.failure_reason {
            if self.last.as_ref().map_or(true, |l| l.failure_reason.is_none()) {
                self.line(format!("      {}", reason.red()));
            }
        }

        self.last = Some(snapshot.clone());
    }
}

fn stage_line(stage: Stage, status: StepStatus) -> String {
    let marker = match status {
        StepStatus::Pending => "○".normal(),
        StepStatus::Executing => "…".blue(),
        StepStatus::Completed => "✓".green(),
        StepStatus::Error => "✗".red(),
    };
    format!("  {} {}", marker, stage.label())
}

/// Drives `target` until nothing is pending, in real or synthetic time.
fn drive<D, F>(
    runtime: &tokio::runtime::Runtime,
    target: &mut D,
    instant: bool,
    observe: F,
) -> Option<D::Outcome>
where
    D: Driven,
    F: FnMut(&D),
{
    if instant {
        SyntheticClock::new().run_until_idle_with(target, observe)
    } else {
        runtime.block_on(run_to_idle_with(target, observe))
    }
}

fn print_step_list(steps: &[Step]) {
    for (i, step) in steps.iter().enumerate() {
        println!(
            "  {}. {} ({}) {}",
            i + 1,
            step.text,
            step.category,
            step.detail.dimmed()
        );
    }
}

fn print_header(completed: bool, elapsed_ms: u64) {
    println!();
    let seconds = format!("{:.1}s", elapsed_ms as f64 / 1000.0);
    if completed {
        println!("{} {}", "Execution completed".green().bold(), seconds.dimmed());
    } else {
        println!("{} {}", "Execution failed".red().bold(), seconds.dimmed());
    }
}

/// Runs a single-phase guided plan directly on one engine.
fn run_guided(
    runtime: &tokio::runtime::Runtime,
    config: &Config,
    title: &str,
    steps: Vec<Step>,
    policy: ModePolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.json {
        println!("{}", title.bold());
        println!("I'll guide you through each step");
        print_step_list(&steps);
        println!();
    }

    let mut progress = Progress::new(std::io::stdout(), config.json);
    let mut engine = Engine::new().with_policy(policy);
    let mut outcome = engine.start(steps, Mode::Guided);
    progress.engine(&engine.snapshot());

    let mut retries_left = config.manual_retries;
    loop {
        if outcome.is_none() {
            outcome = drive(runtime, &mut engine, config.instant, |e| {
                progress.engine(&e.snapshot())
            });
        }

        match outcome {
            Some(EngineOutcome::Failed(_)) if retries_left > 0 => {
                retries_left -= 1;
                if !config.json {
                    println!();
                    println!("{}", "Retrying manually".yellow());
                }
                if !engine.reset_for_retry() {
                    warn!("Manual retry was rejected; keeping the failed run");
                    break;
                }
                progress.reset();
                progress.engine(&engine.snapshot());
                outcome = None;
            }
            _ => break,
        }
    }

    if config.json {
        progress.write_json(&serde_json::json!({ "timeline": engine.timeline().get_events() }));
    } else {
        print_header(
            engine.state().phase == RunPhase::Completed,
            engine.total_elapsed().as_millis() as u64,
        );
        print!("{}", engine.timeline().gantt_chart());
    }

    match outcome {
        Some(EngineOutcome::Failed(e)) => Err(format!("Guided run failed: {}", e).into()),
        _ => Ok(()),
    }
}

/// Runs a multi-phase autonomous plan through the aggregator.
fn run_autonomous(
    runtime: &tokio::runtime::Runtime,
    config: &Config,
    plan: &Plan,
    policy: ModePolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let phases = plan.phases();

    if !config.json {
        println!("{}", "Autonomous execution plan".bold());
        println!("I'll execute each phase sequentially and report progress");
        for phase in &phases {
            println!("{}", phase.title);
            print_step_list(&phase.steps);
        }
    }

    let mut progress = Progress::new(std::io::stdout(), config.json);
    let mut aggregator = WorkflowAggregator::new(Mode::Autonomous).with_policy(policy);
    let mut outcome = aggregator.start(phases);
    progress.aggregator(&aggregator);

    let mut retries_left = config.manual_retries;
    loop {
        if outcome.is_none() {
            outcome = drive(runtime, &mut aggregator, config.instant, |a| {
                progress.aggregator(a)
            });
        }

        match &outcome {
            Some(RunOutcome::Failed { phase, .. }) if retries_left > 0 => {
                retries_left -= 1;
                if !config.json {
                    println!();
                    println!("{}", "Retrying manually".yellow());
                }
                if !aggregator.retry(*phase) {
                    warn!("Manual retry of phase {} was rejected", phase + 1);
                    break;
                }
                progress.reset();
                progress.aggregator(&aggregator);
                outcome = None;
            }
            _ => break,
        }
    }

    if config.json {
        for (i, phase) in aggregator.phases().iter().enumerate() {
            if let Some(engine) = aggregator.engine(i) {
                progress.write_json(&serde_json::json!({
                    "phase": phase.id,
                    "timeline": engine.timeline().get_events(),
                }));
            }
        }
    } else {
        let snapshot = aggregator.snapshot();
        print_header(
            matches!(outcome, Some(RunOutcome::Completed)),
            aggregator.elapsed().as_millis() as u64,
        );
        for (i, phase) in snapshot.phases.iter().enumerate() {
            let status = match phase.status {
                PhaseStatus::Completed => "completed".green(),
                PhaseStatus::Failed => "failed".red(),
                PhaseStatus::Active => "active".blue(),
                PhaseStatus::Queued => "queued".dimmed(),
            };
            println!("  {} [{}]", phase.title, status);
            if let Some(engine) = aggregator.engine(i) {
                print!("{}", engine.timeline().gantt_chart());
            }
        }
    }

    match outcome {
        Some(RunOutcome::Failed { phase_id, error, .. }) => {
            Err(format!("Autonomous run failed in phase '{}': {}", phase_id, error).into())
        }
        _ => Ok(()),
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    if !config.json {
        print_banner();
        println!("{}", GREETING.dimmed());
        println!();
    }

    // Resolve the plan
    let plan = match &config.plan_path {
        Some(path) => {
            let plan = load_plan(path)?;
            if !config.json {
                println!("Loaded plan from {}", path);
            }
            plan
        }
        None => {
            let response = compose_response(&config.request, config.mode);
            if !config.json {
                println!("{} {}", ">".bold(), config.request);
                println!("{}", response.reply);
                println!();
            }
            response.plan
        }
    };

    let policy = plan.mode().policy().with_settings(plan.settings());
    info!(
        "Running {} plan: delay {:?}, retry budget {}, instant: {}",
        plan.mode(),
        policy.delay,
        policy.max_retries,
        config.instant
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    match &plan {
        Plan::Guided { title, steps, .. } => {
            run_guided(&runtime, &config, title, steps.clone(), policy)
        }
        Plan::Autonomous { .. } => run_autonomous(&runtime, &config, &plan, policy),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("flowpilot")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_arguments(&args(&[])).unwrap();
        assert_eq!(config.request, DEFAULT_REQUEST);
        assert_eq!(config.mode, Mode::Guided);
        assert!(!config.instant);
        assert_eq!(config.manual_retries, 0);
    }

    #[test]
    fn test_parse_request_words() {
        let config = parse_arguments(&args(&["add", "an", "orange"])).unwrap();
        assert_eq!(config.request, "add an orange");
    }

    #[test]
    fn test_parse_options() {
        let config = parse_arguments(&args(&[
            "--mode",
            "autonomous",
            "--instant",
            "--json",
            "--manual-retries",
            "2",
            "--plan",
            "plan.yaml",
        ]))
        .unwrap();

        assert_eq!(config.mode, Mode::Autonomous);
        assert!(config.instant);
        assert!(config.json);
        assert_eq!(config.manual_retries, 2);
        assert_eq!(config.plan_path.as_deref(), Some("plan.yaml"));
    }

    fn run_autonomous_progress(request: &str, json: bool) -> (Option<RunOutcome>, String) {
        let response = compose_response(request, Mode::Autonomous);
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        let mut progress = Progress::new(Vec::new(), json);

        assert!(aggregator.start(response.plan.phases()).is_none());
        progress.aggregator(&aggregator);
        let outcome = SyntheticClock::new()
            .run_until_idle_with(&mut aggregator, |a| progress.aggregator(a));

        let output = String::from_utf8(progress.into_inner()).unwrap();
        (outcome, output)
    }

    #[test]
    fn test_autonomous_progress_shows_final_stage_of_every_phase() {
        let (outcome, output) = run_autonomous_progress("add milk", false);
        assert_eq!(outcome, Some(RunOutcome::Completed));

        let validated = output
            .lines()
            .filter(|l| l.contains('✓') && l.contains(Stage::ValidateResult.label()))
            .count();
        assert_eq!(validated, 3);
        assert_eq!(output.matches("Step 5:").count(), 3);
        assert!(output.contains("3/3"));
    }

    #[test]
    fn test_autonomous_progress_shows_failed_phase() {
        let (outcome, output) = run_autonomous_progress("add an orange", false);
        assert!(matches!(outcome, Some(RunOutcome::Failed { phase: 1, .. })));

        // the preparation phase finished before the failure
        assert_eq!(output.matches("Step 5:").count(), 1);
        assert!(output.lines().any(|l| l.contains('✗')));
        assert!(output.contains(flowpilot::execution::pipeline::FAILURE_REASON));
    }

    #[test]
    fn test_autonomous_json_emits_finished_engines() {
        let (_, output) = run_autonomous_progress("add milk", true);

        let finished = output
            .lines()
            .filter(|l| l.starts_with("{\"mode\"") && l.contains("\"phase\":\"completed\""))
            .count();
        assert_eq!(finished, 3);
        assert!(output
            .lines()
            .all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--mode"])).is_err());
        assert!(parse_arguments(&args(&["--mode", "manual"])).is_err());
        assert!(parse_arguments(&args(&["--manual-retries", "x"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
    }
}
