use anyhow::{anyhow, Context};
use clap::Parser;
use colored::Colorize;
use std::io;
use std::time::Duration;

use pitch_wizard::cli::Args;
use pitch_wizard::config::Config;
use pitch_wizard::errors::WizardError;
use pitch_wizard::log::{self, Transcript};
use pitch_wizard::provider;
use pitch_wizard::search::{GoogleSearch, GOOGLE_SEARCH_BASE};
use pitch_wizard::session::{PitchNotes, Session, SessionStore, StepId, TechInput, TechSummary};
use pitch_wizard::ux::{self, Command, SpinnerProvider};
use pitch_wizard::wizard::{Action, Wizard};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    log::init_tracing(args.debug);

    let cfg = Config::resolve(&args).context("loading configuration")?;
    // refuse to start without a usable credential
    let backend = provider::make_provider(&cfg).context("generation service is not configured")?;
    let mut wizard = Wizard::new(Box::new(SpinnerProvider::new(backend)));

    let mut search_on = false;
    if cfg.search {
        let base = cfg.search_base_url.as_deref().unwrap_or(GOOGLE_SEARCH_BASE);
        match GoogleSearch::from_env(base, Duration::from_secs(cfg.timeout_secs)) {
            Some(searcher) => {
                wizard = wizard.with_searcher(Box::new(searcher), cfg.max_search_results);
                search_on = true;
            }
            None => tracing::warn!("web search requested but GOOGLE_SEARCH_API_KEY / GOOGLE_SEARCH_CX are not set"),
        }
    }

    let transcript = cfg.save_transcript.then(|| Transcript::new(&cfg.transcript_dir));
    if let Some(t) = &transcript {
        wizard = wizard.with_transcript(t.clone());
        tracing::info!(dir = %t.root().display(), "saving transcripts");
    }

    ux::print_banner(wizard.provider_name(), search_on);

    if args.quick {
        return quick(&wizard, transcript.as_ref()).await;
    }

    let store = SessionStore::new();
    let id = store.create();
    let mut last_input: Option<TechInput> = None;
    loop {
        let mut session = store.checkout(id).ok_or_else(|| anyhow!("session {id} disappeared"))?;
        let outcome = turn(&wizard, &mut session, &mut last_input).await;
        if let Some(t) = &transcript {
            if let Err(e) = t.save_session(&session) {
                tracing::warn!(error = %e, "could not save session");
            }
        }
        store.put(session);
        if !outcome? {
            break;
        }
    }
    if let Some(t) = &transcript {
        println!("{} {}", "transcript:".dimmed(), t.dir(id).display());
    }
    Ok(())
}

/// One prompt-and-act cycle. `Ok(false)` when the user is done.
async fn turn(wizard: &Wizard, session: &mut Session, last_input: &mut Option<TechInput>) -> anyhow::Result<bool> {
    if session.current() == StepId::Input {
        ux::print_step(session);
        let Some(input) = ux::read_tech_input(last_input.as_ref())? else {
            return Ok(false);
        };
        *last_input = Some(input.clone());
        return run(wizard, session, Action::SubmitInput(input)).await;
    }

    let Some(line) = ux::prompt_line(">")? else {
        return Ok(false);
    };
    match ux::parse_command(&line, session) {
        Err(msg) => {
            println!("{} {}", "!".yellow().bold(), msg.yellow());
            Ok(true)
        }
        Ok(Command::Quit) => Ok(false),
        Ok(Command::Help) => {
            ux::print_help();
            Ok(true)
        }
        Ok(Command::Show) => {
            ux::print_step(session);
            Ok(true)
        }
        Ok(Command::Edit(key)) => {
            println!("{} {}", "新しい内容を入力してください (. だけの行で終了):".dimmed(), key);
            let Some(text) = ux::read_multiline(&mut io::stdin().lock())? else {
                return Ok(false);
            };
            run(wizard, session, Action::Edit { key, text }).await
        }
        Ok(Command::Notes) => {
            let Some(entries) = ux::read_pitch_notes(session.pitch_notes())? else {
                return Ok(false);
            };
            match PitchNotes::new(entries) {
                Ok(notes) => run(wizard, session, Action::Notes(notes)).await,
                Err(e) => {
                    ux::print_error(&e);
                    Ok(true)
                }
            }
        }
        Ok(Command::Act(action)) => run(wizard, session, action).await,
    }
}

async fn run(wizard: &Wizard, session: &mut Session, action: Action) -> anyhow::Result<bool> {
    match wizard.apply(session, action).await {
        Ok(report) => {
            ux::print_report(&report);
            if session.current() != StepId::Input {
                ux::print_step(session);
            }
            Ok(true)
        }
        Err(WizardError::Configuration(msg)) => Err(anyhow!("configuration error: {msg}")),
        Err(e) => {
            ux::print_error(&e);
            Ok(true)
        }
    }
}

async fn quick(wizard: &Wizard, transcript: Option<&Transcript>) -> anyhow::Result<()> {
    let mut previous: Option<TechInput> = None;
    let summary = loop {
        let Some(input) = ux::read_tech_input(previous.as_ref())? else {
            return Ok(());
        };
        match TechSummary::from_input(&input) {
            Ok(summary) => break summary,
            Err(e) => {
                ux::print_error(&e);
                previous = Some(input);
            }
        }
    };

    let pitch = match wizard.quick_pitch(&summary).await {
        Ok(text) => text,
        Err(WizardError::Configuration(msg)) => return Err(anyhow!("configuration error: {msg}")),
        Err(e) => {
            ux::print_error(&e);
            return Ok(());
        }
    };
    ux::print_quick_pitch(&pitch);

    if let Some(t) = transcript {
        let id = uuid::Uuid::new_v4();
        let path = t.save_named(id, "quick_pitch.md", &pitch).context("saving quick pitch")?;
        println!("{} {}", "saved:".dimmed(), path.display());
    }
    Ok(())
}
