//! Drives a [`Session`] through the ideation steps.
//!
//! Every action runs to completion, including the generation calls it triggers, before
//! returning. The session is borrowed for the duration; nothing here holds a lock.

use crate::errors::{GenerationError, WizardError};
use crate::log::Transcript;
use crate::prompt::{build_prompt, quick_pitch_prompt, research_query};
use crate::provider::DynProvider;
use crate::search::DynSearcher;
use crate::session::{
    FieldKey, PitchNotes, ResearchResult, SelectedItem, Session, Slot, SlotValue, StepId,
    StepResult, Task, TechInput, TechSummary, Topic,
};

/// One user interaction with the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SubmitInput(TechInput),
    /// Replace the text of one generated block or candidate item.
    Edit { key: FieldKey, text: String },
    /// Pick candidates by item name on a selection step.
    Choose(Vec<String>),
    /// Replace the user notes the pitch draft is written from.
    Notes(PitchNotes),
    Continue,
    /// Regenerate the failed or missing results of the current step.
    Retry,
    Back(StepId),
    Restart,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::SubmitInput(_) => "submit",
            Action::Edit { .. } => "edit",
            Action::Choose(_) => "choose",
            Action::Notes(_) => "notes",
            Action::Continue => "continue",
            Action::Retry => "retry",
            Action::Back(_) => "back",
            Action::Restart => "restart",
        }
    }
}

/// What an action did, for the host to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Step the session is on afterwards.
    pub step: StepId,
    pub generated: Vec<Task>,
    pub failures: Vec<(Task, GenerationError)>,
    /// Slots removed because an input they were computed from changed.
    pub invalidated: Vec<Slot>,
}

impl Report {
    fn new(step: StepId) -> Self {
        Self { step, generated: Vec::new(), failures: Vec::new(), invalidated: Vec::new() }
    }
}

pub struct Wizard {
    provider: DynProvider,
    searcher: Option<DynSearcher>,
    transcript: Option<Transcript>,
    max_search_results: usize,
}

impl Wizard {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider, searcher: None, transcript: None, max_search_results: 5 }
    }

    pub fn with_searcher(mut self, searcher: DynSearcher, max_results: usize) -> Self {
        self.searcher = Some(searcher);
        self.max_search_results = max_results;
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn apply(&self, session: &mut Session, action: Action) -> Result<Report, WizardError> {
        let from = session.current();
        tracing::debug!(step = %from, action = action.name(), "apply");
        let mut report = Report::new(from);

        match action {
            Action::SubmitInput(input) => self.submit(session, &input, &mut report).await?,
            Action::Edit { key, text } => {
                if key.task.step() != from {
                    return Err(WizardError::validation(format!("{key} is not shown on step {from}")));
                }
                report.invalidated = session.edit(&key, text)?;
                self.refill(session, &mut report).await?;
            }
            Action::Choose(names) => self.choose(session, &names, &mut report).await?,
            Action::Notes(notes) => {
                if from != StepId::PitchDraft {
                    return Err(WizardError::Unsupported { action: "notes", step: from });
                }
                report.invalidated = session.put(Slot::PitchNotes, SlotValue::Notes(notes));
                self.refill(session, &mut report).await?;
            }
            Action::Continue => self.proceed(session, &mut report).await?,
            Action::Retry => self.retry(session, &mut report).await?,
            Action::Back(target) => {
                if target >= from {
                    return Err(WizardError::InvalidTransition { from, to: target });
                }
                report.invalidated = session.clear_after(target);
                session.set_current(target);
            }
            Action::Restart => {
                session.reset();
            }
        }

        report.step = session.current();
        if report.step != from {
            tracing::info!(from = %from, to = %report.step, "step changed");
        }
        Ok(report)
    }

    /// Single-shot pitch outline straight from the technology summary.
    pub async fn quick_pitch(&self, summary: &TechSummary) -> Result<String, WizardError> {
        let prompt = quick_pitch_prompt(summary);
        self.provider.generate(&prompt).await.map_err(|e| {
            if e.is_fatal() {
                WizardError::Configuration(e.to_string())
            } else {
                WizardError::Generation { what: "quick pitch".into(), source: e }
            }
        })
    }

    async fn submit(
        &self,
        session: &mut Session,
        input: &TechInput,
        report: &mut Report,
    ) -> Result<(), WizardError> {
        let from = session.current();
        if from != StepId::Input {
            return Err(WizardError::Unsupported { action: "submit", step: from });
        }
        let summary = TechSummary::from_input(input)?;
        report.invalidated = session.put(Slot::TechSummary, SlotValue::Summary(summary));
        // resubmitting is how the user asks for another attempt after a failure here
        let first = Slot::Generated(Task::TargetStrategy);
        if session.result(Task::TargetStrategy).is_some_and(StepResult::is_failed) {
            report.invalidated.extend(session.remove(first));
        }

        let next = StepId::TargetSelection;
        self.enter(session, next, report).await?;
        if let Some((task, err)) = report.failures.first() {
            return Err(WizardError::Generation { what: task.label().to_string(), source: err.clone() });
        }
        session.set_current(next);
        Ok(())
    }

    async fn choose(
        &self,
        session: &mut Session,
        names: &[String],
        report: &mut Report,
    ) -> Result<(), WizardError> {
        let from = session.current();
        let Some((pick, task)) = from.pick() else {
            return Err(WizardError::Unsupported { action: "choose", step: from });
        };
        if names.is_empty() {
            return Err(WizardError::validation("select at least one"));
        }
        let Some(result) = session.usable(task) else {
            return Err(WizardError::validation(format!("{} has no candidates to choose from", task.label())));
        };

        if let Some(unknown) = names.iter().find(|n| !result.items().iter().any(|i| &i.name == *n)) {
            return Err(WizardError::validation(format!("unknown candidate: {unknown}")));
        }
        let chosen: Vec<SelectedItem> = result
            .items()
            .iter()
            .filter(|i| names.contains(&i.name))
            .map(|i| SelectedItem {
                name: i.name.clone(),
                content: result.effective(&i.name).unwrap_or_else(|| i.content.clone()),
            })
            .collect();

        report.invalidated = session.put(Slot::Selection(pick), SlotValue::Selected(chosen));
        self.advance(session, report).await
    }

    async fn proceed(&self, session: &mut Session, report: &mut Report) -> Result<(), WizardError> {
        let from = session.current();
        if from == StepId::Input || from.pick().is_some() || from.next().is_none() {
            return Err(WizardError::Unsupported { action: "continue", step: from });
        }
        let blocked: Vec<&str> = from
            .entry_tasks()
            .iter()
            .filter(|t| session.usable(**t).is_none())
            .map(|t| t.label())
            .collect();
        if !blocked.is_empty() {
            return Err(WizardError::validation(format!(
                "not ready to continue, retry or go back first: {}",
                blocked.join(", ")
            )));
        }
        self.advance(session, report).await
    }

    async fn retry(&self, session: &mut Session, report: &mut Report) -> Result<(), WizardError> {
        let step = session.current();
        if step.entry_tasks().is_empty() {
            return Err(WizardError::Unsupported { action: "retry", step });
        }
        let stale: Vec<Task> = step
            .entry_tasks()
            .iter()
            .copied()
            .filter(|t| session.result(*t).map_or(true, StepResult::is_failed))
            .collect();
        if stale.is_empty() {
            return Err(WizardError::validation("nothing to retry on this step"));
        }
        for task in stale {
            report.invalidated.extend(session.remove(Slot::Generated(task)));
        }
        self.enter(session, step, report).await
    }

    /// Regenerates results of the current step that a write on the same step invalidated.
    async fn refill(&self, session: &mut Session, report: &mut Report) -> Result<(), WizardError> {
        let step = session.current();
        let stale = step
            .entry_tasks()
            .iter()
            .any(|t| report.invalidated.contains(&Slot::Generated(*t)));
        if stale {
            self.enter(session, step, report).await?;
        }
        Ok(())
    }

    async fn advance(&self, session: &mut Session, report: &mut Report) -> Result<(), WizardError> {
        let from = session.current();
        let Some(next) = from.next() else {
            return Err(WizardError::Unsupported { action: "advance", step: from });
        };
        self.enter(session, next, report).await?;
        session.set_current(next);
        Ok(())
    }

    /// Fills in what `step` displays: research first, then each missing result once.
    async fn enter(&self, session: &mut Session, step: StepId, report: &mut Report) -> Result<(), WizardError> {
        if let Some(topic) = step.research() {
            if !session.contains(Slot::Research(topic)) {
                let research = self.gather(topic, session).await;
                report.invalidated.extend(session.put(Slot::Research(topic), SlotValue::Research(research)));
            }
        }

        for &task in step.entry_tasks() {
            if session.contains(Slot::Generated(task)) {
                continue;
            }
            let prompt = build_prompt(task, session);
            tracing::debug!(%task, prompt_chars = prompt.chars().count(), "generating");
            self.record(|t| t.save_prompt(session.id, task, &prompt));

            let value = match self.provider.generate(&prompt).await {
                Ok(raw) => {
                    self.record(|t| t.save_response(session.id, task, &raw));
                    report.generated.push(task);
                    StepResult::parsed(task, raw)
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(%task, error = %e, "credential rejected");
                    return Err(WizardError::Configuration(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(%task, error = %e, "generation failed");
                    let failed = StepResult::failed(task, &e);
                    report.failures.push((task, e));
                    failed
                }
            };
            report.invalidated.extend(session.put(Slot::Generated(task), SlotValue::Generated(value)));
        }
        Ok(())
    }

    async fn gather(&self, topic: Topic, session: &Session) -> ResearchResult {
        let query = research_query(topic, session);
        let Some(searcher) = &self.searcher else {
            return ResearchResult::unavailable(query, "search disabled");
        };
        match searcher.search(&query, self.max_search_results).await {
            Ok(hits) => {
                tracing::debug!(?topic, hits = hits.len(), "research gathered");
                ResearchResult { query, hits, note: None }
            }
            Err(e) => {
                tracing::warn!(?topic, error = %e, "search failed, continuing without results");
                ResearchResult::unavailable(query, e.to_string())
            }
        }
    }

    fn record<F>(&self, write: F)
    where
        F: FnOnce(&Transcript) -> std::io::Result<std::path::PathBuf>,
    {
        if let Some(t) = &self.transcript {
            if let Err(e) = write(t) {
                tracing::warn!(error = %e, "transcript write failed");
            }
        }
    }
}
