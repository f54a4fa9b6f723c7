use std::io::Write;
use std::process;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use tokio::sync::mpsc;
use url::Url;

use cuefuzz_core::oracle::client::{
    build_prerequisites_prompt, build_target_prompt, SYSTEM_MESSAGE,
};
use cuefuzz_core::oracle::{
    parse_prerequisites, parse_target_selection, targets_from_selection, InferenceClient,
    OpenAiCompatClient, PrerequisiteAnalysis,
};
use cuefuzz_core::{
    ConsoleSink, Cue, CueMatcher, DataPacket, Finding, FuzzConfig, FuzzEngine, HttpTransport,
    KnowledgeBase, MutationTarget, RunState, SuccessRecorder, TargetPlan, TargetState, ValueSpace,
};

#[derive(Parser, Debug)]
#[command(
    name = "cuefuzz",
    version,
    about = "Cue-guided configuration-API fuzzer for embedded network devices",
    override_usage = "cuefuzz <device-url> --template <BODY> [options]",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Dry run (print POCs only):   cuefuzz http://192.168.0.1/goform/WifiBasicSet -T \"security=none&ssid=1&hideSsid=0\" --oracle-targets t.json --oracle-prereqs p.json --dry-run
  Offline oracle files:        cuefuzz http://192.168.0.1/goform/WifiBasicSet -T \"ssid=1&hideSsid=0\" --oracle-targets t.json --oracle-prereqs p.json
  Live oracle:                 cuefuzz http://192.168.0.1/goform/SetNTP -T \"ntpServer=pool.ntp.org&tz=8\" --api-base https://api.openai.com --api-key $KEY
  Resume after interrupt:      cuefuzz http://192.168.0.1/goform/WifiBasicSet -T \"ssid=1&hideSsid=0\" --oracle-targets t.json --oracle-prereqs p.json --resume
  Custom probes:               cuefuzz http://device/goform/SetSysTime -T \"time=2020\" --oracle-targets t.json --oracle-prereqs p.json --overflow-length 4096 --marker probe123"
)]
pub struct Args {
    /// Configuration-API endpoint the POCs are POSTed to.
    pub device: String,

    #[arg(short = 'T', long, required_unless_present = "template_file",
        help = "Seed request body, k=v&k=v form data")]
    pub template: Option<String>,

    #[arg(long, help = "Read the seed request body from a file instead")]
    pub template_file: Option<String>,

    #[arg(long, default_value = "database.json", help = "Function-category knowledge base")]
    pub kb: String,

    #[arg(long, default_value = "success", help = "Directory for confirmed-POC records")]
    pub success_dir: String,

    #[arg(long, help = "File with a canned oracle target-selection response")]
    pub oracle_targets: Option<String>,

    #[arg(long, help = "File with a canned oracle prerequisite-analysis response")]
    pub oracle_prereqs: Option<String>,

    #[arg(long, help = "OpenAI-compatible API base URL for a live oracle")]
    pub api_base: Option<String>,

    #[arg(long, help = "API key for the live oracle")]
    pub api_key: Option<String>,

    #[arg(long, default_value = "gpt-4o", help = "Model name for the live oracle")]
    pub model: String,

    #[arg(long, default_value = "set&exec", help = "Operation-type cue for this endpoint")]
    pub operation_type: String,

    #[arg(long, default_value = "", help = "Function-category cue for this endpoint")]
    pub function_category: String,

    #[arg(long, help = "File with frontend context (HTML/JS) for prerequisite analysis")]
    pub frontend_context: Option<String>,

    #[arg(long, default_value_t = 0.6, help = "Cue fitness threshold for knowledge-base matches")]
    pub threshold: f64,

    #[arg(long, default_value_t = 5, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(long, default_value_t = 3, help = "Retries per request on transient connect failure")]
    pub retries: u32,

    #[arg(long, default_value_t = 500, help = "Delay between requests in milliseconds")]
    pub rate_limit: u64,

    #[arg(long, default_value_t = 200, help = "Initial retry backoff in milliseconds")]
    pub backoff: u64,

    #[arg(long, default_value_t = 64, help = "Cap on assignment tuples per target")]
    pub max_combinations: usize,

    #[arg(long, default_value_t = 2000, help = "Overflow probe length in bytes")]
    pub overflow_length: usize,

    #[arg(long, default_value = "hacker", help = "Marker echoed by the command-injection probe")]
    pub marker: String,

    #[arg(long, help = "File with extra command-injection fragments, one per line")]
    pub fragments: Option<String>,

    #[arg(long, default_value_t = 3.0,
        help = "Responses slower than this multiple of baseline latency are flagged")]
    pub latency_factor: f64,

    #[arg(long, default_value = "/", help = "Path GETed to check the device is still up")]
    pub probe_path: String,

    #[arg(short = 'v', long, default_value_t = false, help = "Show the whole process (Verbose Mode)")]
    pub verbose: bool,

    #[arg(long, help = "Print assembled POCs without sending any request")]
    pub dry_run: bool,

    #[arg(long, help = "Resume an interrupted run from its checkpoint file")]
    pub resume: bool,
}

/// Built-in prompt for target selection, filled per endpoint.
const TARGET_PROMPT: &str = "\
You are analyzing one HTTP configuration request of an embedded network device.
Request body (form data): {DATA_PACKET}
Known cues for this endpoint: {cues}
Operation type: {operation_type}
Function category: {function_category}

Pick at most 5 parameters worth probing for stack overflow or command injection.
Answer with ONLY this JSON schema, placeholder matching the type:
{\"items\": [{\"type\": \"overflow\", \"target\": \"<param>={overflow}\"}, {\"type\": \"cmdi\", \"target\": \"<param>={cmdi}\"}]}";

/// Built-in prompt for prerequisite analysis, filled per mutation target.
const PREREQ_PROMPT: &str = "\
You are analyzing one HTTP configuration request of an embedded network device.
Request body (form data): {DATA_PACKET}
Mutation target: {TARGET}
Frontend context: {PREREQUISITES}

For every OTHER parameter list candidate values, best guess first. Parameters
that gate whether the target value is processed at all go in \"prerequisites\";
the rest go in \"other_param\". Never include the target parameter itself.
Answer with ONLY this JSON schema:
{\"prerequisites\": [[\"<param>=<value>\", ...], ...], \"other_param\": [[\"<param>=<value>\", ...], ...]}";

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "debug" } else { "warn" },
    ))
    .init();

    print_banner();

    let config = config_from(&args);

    let template_text = match (&args.template, &args.template_file) {
        (Some(t), _) => t.clone(),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(t) => t.trim().to_string(),
            Err(e) => fail(&format!("[!] Failed to read '{}': {}", path, e)),
        },
        (None, None) => fail("[!] No request template. Use -T or --template-file."),
    };
    let template = DataPacket::parse(&template_text);
    if template.is_empty() {
        fail("[!] Request template parsed to zero parameters.");
    }

    print_run_config(&args, &template);

    let kb = KnowledgeBase::load(std::path::Path::new(&config.kb_path));
    if kb.is_empty() {
        out(&"[*] Knowledge base empty, relying on oracle classification.".yellow().to_string());
    }
    let cue = Cue::new(&config.operation_type, &config.function_category);
    let matcher = CueMatcher::new(config.threshold);

    // ── Phase 1: target selection ─────────────────────────────────────
    out(&"\n[*] Phase 1: Selecting mutation targets...".bright_cyan().bold().to_string());

    let oracle = OracleSource::from_args(&args);
    let targets = match oracle.select_targets(&template, &cue, &matcher, &kb).await {
        Ok(t) => t,
        Err(e) => fail(&format!("[!] {}", e)),
    };
    let targets = matcher.order_targets(&cue, &kb, targets);
    out(&format!("[+] {} mutation target(s) selected.", targets.len()).green().bold().to_string());
    for t in &targets {
        out(&format!("    {} ({})", t.param, t.vuln_type).white().to_string());
    }

    // ── Phase 2: prerequisite analysis & expansion ────────────────────
    out(&"\n[*] Phase 2: Expanding value spaces...".bright_cyan().bold().to_string());

    let mut plans: Vec<TargetPlan> = Vec::new();
    for target in targets {
        let analysis = match oracle.analyze_prerequisites(&template, &target).await {
            Ok(a) => a,
            Err(e) => {
                eprint_red(&format!("[!] Skipping '{}': {}", target.param, e));
                continue;
            }
        };
        if let Err(e) = analysis.validate_for(&target.param) {
            eprint_red(&format!("[!] Skipping '{}': {}", target.param, e));
            continue;
        }
        let space = ValueSpace::from_specs(&analysis.prerequisites, &analysis.other_param);
        out(&format!(
            "[+] '{}': {} combination(s), running up to {}.",
            target.param,
            space.full_size(),
            space.full_size().min(config.max_combinations)
        )
        .blue()
        .to_string());
        plans.push(TargetPlan { target, space });
    }
    if plans.is_empty() {
        fail("[!] No usable mutation targets remain.");
    }

    if args.dry_run {
        dry_run(&template, &plans, &config);
        return;
    }

    // ── Phase 3: execution ────────────────────────────────────────────
    out(&"\n[*] Phase 3: Executing POCs...".bright_cyan().bold().to_string());

    let endpoint = match Url::parse(&config.device_url) {
        Ok(u) => u,
        Err(e) => fail(&format!("[!] Invalid device URL '{}': {}", config.device_url, e)),
    };
    let transport = Arc::new(HttpTransport::new(endpoint, &config.probe_path, config.timeout));

    let mut probes = config.probes();
    if let Some(ref path) = args.fragments {
        probes = probes.with_fragment_file(path);
    }
    let engine = FuzzEngine::new(Arc::clone(&transport), config.monitor(), probes, config.policy());

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Relaxed);
        }
    });

    let sink = ConsoleSink::new_ref();
    let (finding_tx, finding_rx) = mpsc::channel::<Finding>(100);
    let recorder = tokio::spawn(SuccessRecorder::run(
        finding_rx,
        config.success_path(),
        config.device_url.clone(),
        Arc::clone(&sink),
    ));

    let state_path = RunState::default_path();
    let mut state = if args.resume {
        RunState::load(state_path).unwrap_or_else(|| {
            eprint_red("[!] No checkpoint found, starting fresh.");
            RunState::new(&config.device_url, plans.iter().map(|p| p.target.param.clone()).collect())
        })
    } else {
        RunState::new(&config.device_url, plans.iter().map(|p| p.target.param.clone()).collect())
    };

    for plan in &plans {
        if args.resume && state.is_completed(&plan.target.param) {
            out(&format!("[*] '{}' already completed, skipping.", plan.target.param).dimmed().to_string());
            continue;
        }
        let reports = engine
            .run(&template, std::slice::from_ref(plan), &finding_tx, &sink)
            .await;
        for report in reports {
            if report.state != TargetState::Cancelled {
                if let Err(e) = state.checkpoint(state_path, &report.param, report.state) {
                    eprint_red(&format!("[!] Checkpoint failed: {}", e));
                }
            }
        }
    }
    drop(finding_tx);

    let records = recorder.await.unwrap_or_default();
    out(&"\n──────────────────────────────────────────────────".dimmed().to_string());
    SuccessRecorder::report_summary(&records, &sink);
    if state.pending_targets.is_empty() {
        RunState::delete(state_path);
    } else {
        out(&format!("[*] Checkpoint kept at {} for --resume.", state_path).yellow().to_string());
    }
}

/// Where oracle answers come from: canned response files or a live
/// chat-completions endpoint.
enum OracleSource {
    Files {
        targets_path: String,
        prereqs_path: Option<String>,
    },
    Live {
        client: OpenAiCompatClient,
        frontend_context: String,
    },
}

impl OracleSource {
    fn from_args(args: &Args) -> Self {
        if let Some(ref path) = args.oracle_targets {
            return OracleSource::Files {
                targets_path: path.clone(),
                prereqs_path: args.oracle_prereqs.clone(),
            };
        }
        match (&args.api_base, &args.api_key) {
            (Some(base), Some(key)) => {
                let frontend_context = args
                    .frontend_context
                    .as_deref()
                    .and_then(|p| std::fs::read_to_string(p).ok())
                    .unwrap_or_default();
                OracleSource::Live {
                    client: OpenAiCompatClient::new(base, key, &args.model, 0.2),
                    frontend_context,
                }
            }
            _ => fail(
                "[!] No oracle configured. Provide --oracle-targets/--oracle-prereqs files or --api-base with --api-key.",
            ),
        }
    }

    async fn select_targets(
        &self,
        template: &DataPacket,
        cue: &Cue,
        matcher: &CueMatcher,
        kb: &KnowledgeBase,
    ) -> Result<Vec<MutationTarget>, cuefuzz_core::FuzzError> {
        let raw = match self {
            OracleSource::Files { targets_path, .. } => std::fs::read_to_string(targets_path)?,
            OracleSource::Live { client, .. } => {
                let mut cues: Vec<String> = Vec::new();
                for affinity in matcher.rank(cue, kb) {
                    if let Some(known) = kb.cues_for(&affinity.function_category) {
                        cues.extend(known.iter().cloned());
                    }
                }
                let prompt = build_target_prompt(
                    TARGET_PROMPT,
                    &template.serialize(),
                    &cues,
                    &cue.operation_type,
                    &cue.function_category,
                );
                client.complete(SYSTEM_MESSAGE, &prompt).await?
            }
        };
        let selection = parse_target_selection(&raw)?;
        Ok(targets_from_selection(&selection))
    }

    async fn analyze_prerequisites(
        &self,
        template: &DataPacket,
        target: &MutationTarget,
    ) -> Result<PrerequisiteAnalysis, cuefuzz_core::FuzzError> {
        let raw = match self {
            OracleSource::Files { prereqs_path, .. } => match prereqs_path {
                Some(path) => std::fs::read_to_string(path)?,
                // No prerequisite file means one POC per target, template
                // values untouched apart from the probe. That still needs
                // every other key assigned, so synthesize identity groups.
                None => return Ok(identity_analysis(template, &target.param)),
            },
            OracleSource::Live {
                client,
                frontend_context,
            } => {
                let expr = format!("{}={}", target.param, target.placeholder);
                let prompt = build_prerequisites_prompt(
                    PREREQ_PROMPT,
                    &template.serialize(),
                    &expr,
                    frontend_context,
                );
                client.complete(SYSTEM_MESSAGE, &prompt).await?
            }
        };
        parse_prerequisites(&raw)
    }
}

/// One single-value group per non-target parameter, taken from the template.
fn identity_analysis(template: &DataPacket, target_param: &str) -> PrerequisiteAnalysis {
    let other_param = template
        .pairs()
        .iter()
        .filter(|(k, _)| k.as_str() != target_param)
        .map(|(k, v)| vec![format!("{}={}", k, v)])
        .collect();
    PrerequisiteAnalysis {
        prerequisites: Vec::new(),
        other_param,
    }
}

/// Prints every POC that would be sent, without touching the network.
fn dry_run(template: &DataPacket, plans: &[TargetPlan], config: &FuzzConfig) {
    let probes = config.probes();
    for plan in plans {
        let probe_value = probes.resolve(plan.target.vuln_type);
        let mut seq = 0usize;
        for tuple in plan.space.tuples(config.max_combinations) {
            seq += 1;
            match cuefuzz_core::core::assembler::assemble(
                template,
                &plan.target,
                &tuple,
                &probe_value,
                seq,
            ) {
                Ok(poc) => println!(
                    "[DRY RUN] {} #{}: {}",
                    plan.target.param,
                    seq,
                    truncate_for_display(&poc.body(), 120)
                ),
                Err(e) => {
                    eprint_red(&format!("[!] '{}': {}", plan.target.param, e));
                    break;
                }
            }
        }
    }
}

fn truncate_for_display(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}... ({} bytes)", &s[..idx], s.len()),
        None => s.to_string(),
    }
}

fn config_from(args: &Args) -> FuzzConfig {
    FuzzConfig {
        device_url: args.device.clone(),
        probe_path: args.probe_path.clone(),
        template: args.template.clone().unwrap_or_default(),
        success_dir: args.success_dir.clone(),
        kb_path: args.kb.clone(),
        timeout: args.timeout,
        retries: args.retries,
        rate_limit_ms: args.rate_limit,
        backoff_ms: args.backoff,
        max_combinations: args.max_combinations,
        threshold: args.threshold,
        overflow_length: args.overflow_length,
        marker: args.marker.clone(),
        latency_factor: args.latency_factor,
        operation_type: args.operation_type.clone(),
        function_category: args.function_category.clone(),
        verbose: args.verbose,
        dry_run: args.dry_run,
        resume: args.resume,
    }
}

fn out(text: &str) {
    print!("{}\r\n", text);
    std::io::stdout().flush().ok();
}

fn eprint_red(text: &str) {
    eprint!("{}\r\n", text.red());
}

fn fail(text: &str) -> ! {
    eprint_red(text);
    process::exit(1);
}

fn print_banner() {
    let banner = r#"
      ██████╗██╗   ██╗███████╗███████╗██╗   ██╗███████╗███████╗
     ██╔════╝██║   ██║██╔════╝██╔════╝██║   ██║╚══███╔╝╚══███╔╝
     ██║     ██║   ██║█████╗  █████╗  ██║   ██║  ███╔╝   ███╔╝
     ██║     ██║   ██║██╔══╝  ██╔══╝  ██║   ██║ ███╔╝   ███╔╝
     ╚██████╗╚██████╔╝███████╗██║     ╚██████╔╝███████╗███████╗
      ╚═════╝ ╚═════╝ ╚══════╝╚═╝      ╚═════╝ ╚══════╝╚══════╝
    "#;
    out(&banner.bright_cyan().bold().to_string());
    out(&"    Only run against devices you are authorized to test.".dimmed().to_string());
    out(&"──────────────────────────────────────────────────".dimmed().to_string());
}

fn print_run_config(args: &Args, template: &DataPacket) {
    out(&format!("[+] Device:       {}", args.device).green().bold().to_string());
    out(&format!("[+] Parameters:   {}", template.len()).blue().to_string());
    out(&format!("[+] Timeout:      {}s", args.timeout).blue().to_string());
    out(&format!("[+] Rate limit:   {}ms between requests", args.rate_limit).blue().to_string());
    out(&format!("[+] Combinations: up to {} per target", args.max_combinations).blue().to_string());
    let oracle_label = if args.oracle_targets.is_some() {
        "canned files"
    } else if args.api_base.is_some() {
        "live"
    } else {
        "none"
    };
    out(&format!("[+] Oracle:       {}", oracle_label).magenta().bold().to_string());
    if args.dry_run {
        out(&"[+] Mode:         DRY RUN (no requests sent)".yellow().to_string());
    }
    if args.resume {
        out(&"[+] Resume:       ON".yellow().to_string());
    }
    out(&"──────────────────────────────────────────────────".dimmed().to_string());
}
