use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::errors::{GenerationError, WizardError};
use crate::parse::{self, Item, ItemKind, Parsed, Sections};
use crate::search::SearchHit;

/// Sentinel stored as the raw text of a result whose generation call failed.
pub const GENERATION_FAILED: &str = "AIによる生成に失敗しました。";
/// Label of the unit holding text generated before the first heading.
pub const PREAMBLE: &str = "前文";

/// ========================================
/// Steps, tasks and slots
/// ========================================

/// One wizard screen. Declaration order is workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Input,
    TargetSelection,
    ProblemTriage,
    StorySelection,
    ValuePropositionCanvas,
    LeanCanvasDraft,
    DeepDive,
    CompetitorAndMoat,
    PitchDraft,
    InvestorReview,
}

impl StepId {
    pub const ALL: [StepId; 10] = [
        StepId::Input,
        StepId::TargetSelection,
        StepId::ProblemTriage,
        StepId::StorySelection,
        StepId::ValuePropositionCanvas,
        StepId::LeanCanvasDraft,
        StepId::DeepDive,
        StepId::CompetitorAndMoat,
        StepId::PitchDraft,
        StepId::InvestorReview,
    ];

    pub fn code(self) -> &'static str {
        match self {
            StepId::Input => "1",
            StepId::TargetSelection => "1.2",
            StepId::ProblemTriage => "1.3",
            StepId::StorySelection => "1.5",
            StepId::ValuePropositionCanvas => "2.1",
            StepId::LeanCanvasDraft => "2.2",
            StepId::DeepDive => "3",
            StepId::CompetitorAndMoat => "4",
            StepId::PitchDraft => "5",
            StepId::InvestorReview => "6",
        }
    }

    pub fn from_code(code: &str) -> Option<StepId> {
        StepId::ALL.into_iter().find(|s| s.code() == code.trim())
    }

    pub fn title(self) -> &'static str {
        match self {
            StepId::Input => "技術概要の入力",
            StepId::TargetSelection => "ターゲット市場の選択",
            StepId::ProblemTriage => "顧客課題の選別",
            StepId::StorySelection => "事業ストーリーの選抜・修正",
            StepId::ValuePropositionCanvas => "バリュープロポジションキャンバス",
            StepId::LeanCanvasDraft => "リーンキャンバス",
            StepId::DeepDive => "深掘り分析",
            StepId::CompetitorAndMoat => "競合分析とモート",
            StepId::PitchDraft => "ピッチ資料ドラフト",
            StepId::InvestorReview => "投資家レビュー",
        }
    }

    pub fn next(self) -> Option<StepId> {
        let idx = StepId::ALL.iter().position(|s| *s == self)?;
        StepId::ALL.get(idx + 1).copied()
    }

    pub fn previous(self) -> Option<StepId> {
        let idx = StepId::ALL.iter().position(|s| *s == self)?;
        idx.checked_sub(1).map(|i| StepId::ALL[i])
    }

    /// Forward moves go one step at a time; backward moves may jump to any earlier step.
    pub fn can_transition(self, to: StepId) -> bool {
        to < self || self.next() == Some(to)
    }

    /// Generation tasks whose results this step displays, in generation order.
    pub fn entry_tasks(self) -> &'static [Task] {
        match self {
            StepId::Input => &[],
            StepId::TargetSelection => &[Task::TargetStrategy],
            StepId::ProblemTriage => &[Task::ProblemList],
            StepId::StorySelection => &[Task::StoryProposals],
            StepId::ValuePropositionCanvas => &[Task::ValueProposition],
            StepId::LeanCanvasDraft => &[Task::LeanCanvas],
            StepId::DeepDive => &[Task::Mvp, Task::Swot, Task::FourP, Task::ThreeC, Task::Financials],
            StepId::CompetitorAndMoat => &[Task::CompetitorAnalysis, Task::MoatProposals],
            StepId::PitchDraft => &[Task::PitchDeck],
            StepId::InvestorReview => &[Task::InvestorReview],
        }
    }

    /// Selection made on this step and the task whose items are offered.
    pub fn pick(self) -> Option<(Pick, Task)> {
        match self {
            StepId::TargetSelection => Some((Pick::Targets, Task::TargetStrategy)),
            StepId::ProblemTriage => Some((Pick::Problems, Task::ProblemList)),
            StepId::StorySelection => Some((Pick::Stories, Task::StoryProposals)),
            StepId::CompetitorAndMoat => Some((Pick::Moats, Task::MoatProposals)),
            _ => None,
        }
    }

    /// Research gathered before this step's prompts are built.
    pub fn research(self) -> Option<Topic> {
        match self {
            StepId::TargetSelection => Some(Topic::Market),
            StepId::CompetitorAndMoat => Some(Topic::Competitors),
            _ => None,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One kind of generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    TargetStrategy,
    ProblemList,
    StoryProposals,
    ValueProposition,
    LeanCanvas,
    Mvp,
    Swot,
    FourP,
    ThreeC,
    Financials,
    CompetitorAnalysis,
    MoatProposals,
    PitchDeck,
    InvestorReview,
}

impl Task {
    pub const ALL: [Task; 14] = [
        Task::TargetStrategy,
        Task::ProblemList,
        Task::StoryProposals,
        Task::ValueProposition,
        Task::LeanCanvas,
        Task::Mvp,
        Task::Swot,
        Task::FourP,
        Task::ThreeC,
        Task::Financials,
        Task::CompetitorAnalysis,
        Task::MoatProposals,
        Task::PitchDeck,
        Task::InvestorReview,
    ];

    pub fn step(self) -> StepId {
        StepId::ALL
            .into_iter()
            .find(|s| s.entry_tasks().contains(&self))
            .unwrap_or(StepId::Input)
    }

    pub fn code(self) -> &'static str {
        match self {
            Task::TargetStrategy => "target_strategy",
            Task::ProblemList => "problem_list",
            Task::StoryProposals => "story_proposals",
            Task::ValueProposition => "value_proposition",
            Task::LeanCanvas => "lean_canvas",
            Task::Mvp => "mvp",
            Task::Swot => "swot",
            Task::FourP => "4p",
            Task::ThreeC => "3c",
            Task::Financials => "financials",
            Task::CompetitorAnalysis => "competitor_analysis",
            Task::MoatProposals => "moat_proposals",
            Task::PitchDeck => "pitch_deck",
            Task::InvestorReview => "investor_review",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Task::TargetStrategy => "ターゲット戦略",
            Task::ProblemList => "課題リスト",
            Task::StoryProposals => "事業ストーリー案",
            Task::ValueProposition => "バリュープロポジションキャンバス",
            Task::LeanCanvas => "リーンキャンバス",
            Task::Mvp => "MVP",
            Task::Swot => "SWOT分析",
            Task::FourP => "4P分析",
            Task::ThreeC => "3C分析",
            Task::Financials => "収支計画",
            Task::CompetitorAnalysis => "競合分析",
            Task::MoatProposals => "モート案",
            Task::PitchDeck => "ピッチ資料",
            Task::InvestorReview => "VC評価",
        }
    }

    pub fn parse_mode(self) -> parse::Mode {
        match self {
            Task::TargetStrategy => parse::Mode::Items(ItemKind::Targets),
            Task::ProblemList => parse::Mode::Items(ItemKind::Problems),
            Task::StoryProposals => parse::Mode::Items(ItemKind::Stories),
            Task::MoatProposals => parse::Mode::Items(ItemKind::Moats),
            Task::LeanCanvas | Task::PitchDeck | Task::InvestorReview => parse::Mode::Scored,
            _ => parse::Mode::Blocks,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    Targets,
    Problems,
    Stories,
    Moats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Market,
    Competitors,
}

/// A typed session field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    TechSummary,
    Research(Topic),
    Generated(Task),
    Selection(Pick),
    /// Optional per-section notes for the pitch draft.
    PitchNotes,
}

impl Slot {
    pub fn all() -> Vec<Slot> {
        let mut out = vec![
            Slot::TechSummary,
            Slot::Research(Topic::Market),
            Slot::Research(Topic::Competitors),
        ];
        out.extend(Task::ALL.into_iter().map(Slot::Generated));
        out.extend([Pick::Targets, Pick::Problems, Pick::Stories, Pick::Moats].map(Slot::Selection));
        out.push(Slot::PitchNotes);
        out
    }

    /// Slots this one is computed from. Changing any of them invalidates this slot.
    pub fn inputs(self) -> Vec<Slot> {
        use Slot::{Generated as G, Research as R, Selection as S, TechSummary as T};
        match self {
            T | Slot::PitchNotes => vec![],
            R(Topic::Market) => vec![T],
            R(Topic::Competitors) => vec![T, S(Pick::Targets)],
            S(Pick::Targets) => vec![G(Task::TargetStrategy)],
            S(Pick::Problems) => vec![G(Task::ProblemList)],
            S(Pick::Stories) => vec![G(Task::StoryProposals)],
            S(Pick::Moats) => vec![G(Task::MoatProposals)],
            G(task) => match task {
                Task::TargetStrategy => vec![T, R(Topic::Market)],
                Task::ProblemList => vec![T, S(Pick::Targets)],
                Task::StoryProposals => vec![T, S(Pick::Targets), S(Pick::Problems)],
                Task::ValueProposition => {
                    vec![T, S(Pick::Targets), S(Pick::Problems), S(Pick::Stories)]
                }
                Task::LeanCanvas => vec![
                    T,
                    S(Pick::Targets),
                    S(Pick::Problems),
                    S(Pick::Stories),
                    G(Task::ValueProposition),
                ],
                Task::Mvp | Task::Swot | Task::FourP | Task::ThreeC | Task::Financials => {
                    vec![T, S(Pick::Targets), G(Task::LeanCanvas)]
                }
                Task::CompetitorAnalysis => {
                    vec![T, S(Pick::Targets), G(Task::LeanCanvas), R(Topic::Competitors)]
                }
                Task::MoatProposals => vec![T, G(Task::LeanCanvas), G(Task::CompetitorAnalysis)],
                Task::PitchDeck => vec![
                    T,
                    S(Pick::Targets),
                    S(Pick::Problems),
                    S(Pick::Stories),
                    G(Task::ValueProposition),
                    G(Task::LeanCanvas),
                    G(Task::Mvp),
                    G(Task::Swot),
                    G(Task::FourP),
                    G(Task::ThreeC),
                    G(Task::Financials),
                    G(Task::CompetitorAnalysis),
                    S(Pick::Moats),
                    Slot::PitchNotes,
                ],
                Task::InvestorReview => vec![T, G(Task::PitchDeck)],
            },
        }
    }

    /// Step on which this slot is displayed or entered.
    pub fn owner(self) -> StepId {
        match self {
            Slot::TechSummary => StepId::Input,
            Slot::Research(Topic::Market) => StepId::TargetSelection,
            Slot::Research(Topic::Competitors) => StepId::CompetitorAndMoat,
            Slot::Generated(task) => task.step(),
            Slot::Selection(Pick::Targets) => StepId::TargetSelection,
            Slot::Selection(Pick::Problems) => StepId::ProblemTriage,
            Slot::Selection(Pick::Stories) => StepId::StorySelection,
            Slot::Selection(Pick::Moats) => StepId::CompetitorAndMoat,
            Slot::PitchNotes => StepId::PitchDraft,
        }
    }

    /// Slots that read this one directly.
    pub fn dependents(self) -> Vec<Slot> {
        Slot::all()
            .into_iter()
            .filter(|s| s.inputs().contains(&self))
            .collect()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::TechSummary => write!(f, "tech_summary"),
            Slot::Research(Topic::Market) => write!(f, "research:market"),
            Slot::Research(Topic::Competitors) => write!(f, "research:competitors"),
            Slot::Generated(task) => write!(f, "generated:{task}"),
            Slot::Selection(Pick::Targets) => write!(f, "selection:targets"),
            Slot::Selection(Pick::Problems) => write!(f, "selection:problems"),
            Slot::Selection(Pick::Stories) => write!(f, "selection:stories"),
            Slot::Selection(Pick::Moats) => write!(f, "selection:moats"),
            Slot::PitchNotes => write!(f, "pitch_notes"),
        }
    }
}

/// Composite key of one editable text block: owning step, task and block label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FieldKey {
    pub task: Task,
    pub label: String,
}

impl FieldKey {
    pub fn new(task: Task, label: impl Into<String>) -> Self {
        Self { task, label: label.into() }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.task.step().code(), self.task.code(), self.label)
    }
}

/// ========================================
/// Slot values
/// ========================================

/// Raw form fields of the Input step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TechInput {
    pub name: String,
    pub problem: String,
    pub features: String,
    pub areas: String,
    pub supplement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TechSummary {
    pub name: String,
    pub problem: String,
    pub features: String,
    pub areas: String,
    pub supplement: Option<String>,
}

impl TechSummary {
    /// Validates the four required fields and trims everything.
    pub fn from_input(input: &TechInput) -> Result<Self, WizardError> {
        let required = [
            ("技術の名称", &input.name),
            ("解決したい課題", &input.problem),
            ("技術的な特徴・新規性", &input.features),
            ("応用できそうな分野・用途", &input.areas),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(label, _)| *label)
            .collect();
        if !missing.is_empty() {
            return Err(WizardError::validation(format!(
                "技術の基本情報（名称、課題、特徴、応用分野）は入力必須です。未入力: {}",
                missing.join("、")
            )));
        }
        let supplement = Some(input.supplement.trim().to_string()).filter(|s| !s.is_empty());
        Ok(Self {
            name: input.name.trim().to_string(),
            problem: input.problem.trim().to_string(),
            features: input.features.trim().to_string(),
            areas: input.areas.trim().to_string(),
            supplement,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "技術の名称: {}\n解決したい課題: {}\n技術的な特徴・新規性: {}\n応用できそうな分野・用途: {}\n補足情報: {}",
            self.name,
            self.problem,
            self.features,
            self.areas,
            self.supplement.as_deref().unwrap_or("なし")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedItem {
    pub name: String,
    pub content: String,
}

/// Pitch sections the user may annotate before the draft is written.
pub const PITCH_NOTE_TOPICS: [&str; 9] = [
    "顧客の課題",
    "市場規模",
    "競合",
    "差別化ポイント",
    "ビジネスモデル",
    "なぜ今か",
    "なぜ自分か",
    "事業計画メモ",
    "収支計画メモ",
];

/// User notes keyed by one of [`PITCH_NOTE_TOPICS`]. Blank notes are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PitchNotes {
    notes: BTreeMap<String, String>,
}

impl PitchNotes {
    pub fn new<I, K, V>(entries: I) -> Result<Self, WizardError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut notes = BTreeMap::new();
        for (topic, text) in entries {
            let topic = topic.into();
            if !PITCH_NOTE_TOPICS.contains(&topic.as_str()) {
                return Err(WizardError::validation(format!("unknown pitch topic: {topic}")));
            }
            let text = text.as_ref().trim();
            if !text.is_empty() {
                notes.insert(topic, text.to_string());
            }
        }
        Ok(Self { notes })
    }

    pub fn get(&self, topic: &str) -> Option<&str> {
        self.notes.get(topic).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResearchResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ResearchResult {
    pub fn unavailable(query: impl Into<String>, note: impl Into<String>) -> Self {
        Self { query: query.into(), hits: Vec::new(), note: Some(note.into()) }
    }
}

/// Output of one generation call, parsed, plus user edits keyed by block/item label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub task: Task,
    pub raw: String,
    pub parsed: Parsed,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub edits: BTreeMap<String, String>,
    pub generated_at: DateTime<Utc>,
}

impl StepResult {
    pub fn parsed(task: Task, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = parse::parse_response(task.parse_mode(), &raw);
        Self { task, raw, parsed, failure: None, edits: BTreeMap::new(), generated_at: Utc::now() }
    }

    pub fn failed(task: Task, err: &GenerationError) -> Self {
        Self {
            task,
            raw: GENERATION_FAILED.to_string(),
            parsed: Parsed::Blocks { sections: Sections::default() },
            failure: Some(err.to_string()),
            edits: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Generated items (selection tasks only).
    pub fn items(&self) -> &[Item] {
        match &self.parsed {
            Parsed::Items { items } => items,
            _ => &[],
        }
    }

    /// Editable units in display order: (label, title, generated text).
    pub fn units(&self) -> Vec<(String, String, String)> {
        match &self.parsed {
            Parsed::Items { items } => items
                .iter()
                .map(|i| (i.name.clone(), i.title.clone(), i.content.clone()))
                .collect(),
            Parsed::Blocks { sections } => block_units(sections),
            Parsed::Scored(scored) => block_units(&scored.draft),
        }
    }

    /// Current text of a unit: the user edit when one exists, else the generated text.
    pub fn effective(&self, label: &str) -> Option<String> {
        if let Some(edit) = self.edits.get(label) {
            return Some(edit.clone());
        }
        self.units()
            .into_iter()
            .find(|(l, _, _)| l == label)
            .map(|(_, _, text)| text)
    }

    /// Stores `text` verbatim as the edit of `label`. Returns whether the effective text changed.
    pub fn apply_edit(&mut self, label: &str, text: String) -> Result<bool, WizardError> {
        let current = self
            .effective(label)
            .ok_or_else(|| WizardError::validation(format!("unknown block: {label}")))?;
        let changed = current != text;
        self.edits.insert(label.to_string(), text);
        Ok(changed)
    }

    /// Effective content rendered for use as upstream prompt context. `None` when failed.
    pub fn context_text(&self) -> Option<String> {
        if self.is_failed() {
            return None;
        }
        let text = match &self.parsed {
            Parsed::Items { .. } => self
                .units()
                .into_iter()
                .map(|(label, title, _)| {
                    format!("{}\n{}", title, self.effective(&label).unwrap_or_default())
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
            Parsed::Blocks { .. } | Parsed::Scored(_) => self
                .units()
                .into_iter()
                .map(|(label, _, _)| {
                    let text = self.effective(&label).unwrap_or_default();
                    if label == PREAMBLE {
                        text
                    } else {
                        format!("### {label}\n{text}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        Some(text.trim().to_string())
    }
}

fn block_units(sections: &Sections) -> Vec<(String, String, String)> {
    let preamble = Some(&sections.preamble)
        .filter(|p| !p.is_empty())
        .map(|p| (PREAMBLE.to_string(), PREAMBLE.to_string(), p.clone()));
    preamble
        .into_iter()
        .chain(sections.iter().map(|b| (b.heading.clone(), b.heading.clone(), b.body.clone())))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Summary(TechSummary),
    Research(ResearchResult),
    Generated(StepResult),
    Selected(Vec<SelectedItem>),
    Notes(PitchNotes),
}

/// One editable unit as shown on a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: FieldKey,
    pub title: String,
    pub text: String,
}

/// ========================================
/// Session
/// ========================================

/// All wizard inputs, selections and cached results of one user run.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    current: StepId,
    #[serde(serialize_with = "slots_as_entries")]
    slots: BTreeMap<Slot, SlotValue>,
    pub created_at: DateTime<Utc>,
}

fn slots_as_entries<S: Serializer>(
    slots: &BTreeMap<Slot, SlotValue>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        slot: String,
        value: &'a SlotValue,
    }
    ser.collect_seq(slots.iter().map(|(slot, value)| Entry { slot: slot.to_string(), value }))
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            current: StepId::Input,
            slots: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn current(&self) -> StepId {
        self.current
    }

    pub(crate) fn set_current(&mut self, step: StepId) {
        self.current = step;
    }

    pub fn get(&self, slot: Slot) -> Option<&SlotValue> {
        self.slots.get(&slot)
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.slots.contains_key(&slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots.keys().copied()
    }

    pub fn tech_summary(&self) -> Option<&TechSummary> {
        match self.slots.get(&Slot::TechSummary) {
            Some(SlotValue::Summary(s)) => Some(s),
            _ => None,
        }
    }

    pub fn result(&self, task: Task) -> Option<&StepResult> {
        match self.slots.get(&Slot::Generated(task)) {
            Some(SlotValue::Generated(r)) => Some(r),
            _ => None,
        }
    }

    /// Result of `task` when present and not failed.
    pub fn usable(&self, task: Task) -> Option<&StepResult> {
        self.result(task).filter(|r| !r.is_failed())
    }

    pub fn selection(&self, pick: Pick) -> Option<&[SelectedItem]> {
        match self.slots.get(&Slot::Selection(pick)) {
            Some(SlotValue::Selected(items)) => Some(items),
            _ => None,
        }
    }

    pub fn pitch_notes(&self) -> Option<&PitchNotes> {
        match self.slots.get(&Slot::PitchNotes) {
            Some(SlotValue::Notes(n)) => Some(n),
            _ => None,
        }
    }

    pub fn research(&self, topic: Topic) -> Option<&ResearchResult> {
        match self.slots.get(&Slot::Research(topic)) {
            Some(SlotValue::Research(r)) => Some(r),
            _ => None,
        }
    }

    /// Writes `value` into `slot`. When the value differs from what was stored,
    /// every slot depending on it (transitively) is removed. Returns the removed slots.
    pub fn put(&mut self, slot: Slot, value: SlotValue) -> Vec<Slot> {
        if self.slots.get(&slot) == Some(&value) {
            return Vec::new();
        }
        self.slots.insert(slot, value);
        self.invalidate_dependents(slot)
    }

    /// Removes `slot` and everything depending on it.
    pub fn remove(&mut self, slot: Slot) -> Vec<Slot> {
        let mut removed = Vec::new();
        if self.slots.remove(&slot).is_some() {
            removed.push(slot);
        }
        removed.extend(self.invalidate_dependents(slot));
        removed
    }

    /// Records an edit of a generated unit, invalidating downstream slots if the text changed.
    pub fn edit(&mut self, key: &FieldKey, text: String) -> Result<Vec<Slot>, WizardError> {
        let slot = Slot::Generated(key.task);
        let changed = match self.slots.get_mut(&slot) {
            Some(SlotValue::Generated(result)) if !result.is_failed() => {
                result.apply_edit(&key.label, text)?
            }
            _ => {
                return Err(WizardError::validation(format!(
                    "nothing to edit for {key}: {} has no result",
                    key.task.label()
                )))
            }
        };
        Ok(if changed { self.invalidate_dependents(slot) } else { Vec::new() })
    }

    fn invalidate_dependents(&mut self, slot: Slot) -> Vec<Slot> {
        let mut removed = Vec::new();
        let mut queue = slot.dependents();
        while let Some(next) = queue.pop() {
            if self.slots.remove(&next).is_some() {
                removed.push(next);
            }
            queue.extend(next.dependents());
        }
        removed.sort();
        removed.dedup();
        removed
    }

    /// Removes every slot owned by a step strictly after `step`.
    pub fn clear_after(&mut self, step: StepId) -> Vec<Slot> {
        let stale: Vec<Slot> = self.slots.keys().copied().filter(|s| s.owner() > step).collect();
        for slot in &stale {
            self.slots.remove(slot);
        }
        stale
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.current = StepId::Input;
    }

    /// Editable units shown on `step`, with effective text.
    pub fn fields(&self, step: StepId) -> Vec<Field> {
        let mut out = Vec::new();
        for &task in step.entry_tasks() {
            let Some(result) = self.usable(task) else { continue };
            for (label, title, _) in result.units() {
                let text = result.effective(&label).unwrap_or_default();
                out.push(Field { key: FieldKey::new(task, label), title, text });
            }
        }
        out
    }
}

/// ========================================
/// Session store
/// ========================================

/// Maps session ids to sessions for the hosting layer. Sessions are checked out
/// by value, driven to completion, and put back, so no lock is held across a call.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        self.inner.lock().insert(id, session);
        id
    }

    pub fn checkout(&self, id: Uuid) -> Option<Session> {
        self.inner.lock().get(&id).cloned()
    }

    pub fn put(&self, session: Session) {
        self.inner.lock().insert(session.id, session);
    }

    /// Runs a synchronous update in place. Never pass anything that awaits.
    pub fn with<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.inner.lock().get_mut(&id).map(f)
    }

    pub fn remove(&self, id: Uuid) -> Option<Session> {
        self.inner.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> TechSummary {
        TechSummary::from_input(&TechInput {
            name: "Foo".into(),
            problem: "Bar".into(),
            features: "Baz".into(),
            areas: "Widgets".into(),
            supplement: String::new(),
        })
        .unwrap()
    }

    fn selected(name: &str) -> SlotValue {
        SlotValue::Selected(vec![SelectedItem { name: name.into(), content: "c".into() }])
    }

    fn generated(task: Task) -> SlotValue {
        SlotValue::Generated(StepResult::parsed(task, "### a\nb"))
    }

    fn research() -> SlotValue {
        SlotValue::Research(ResearchResult::unavailable("q", "search disabled"))
    }

    /// Every slot filled, written in dependency order so no write invalidates an earlier one.
    fn filled() -> Session {
        let mut s = Session::new();
        s.put(Slot::TechSummary, SlotValue::Summary(summary()));
        s.put(Slot::Research(Topic::Market), research());
        s.put(Slot::Generated(Task::TargetStrategy), generated(Task::TargetStrategy));
        s.put(Slot::Selection(Pick::Targets), selected("ターゲット案1"));
        s.put(Slot::Generated(Task::ProblemList), generated(Task::ProblemList));
        s.put(Slot::Selection(Pick::Problems), selected("課題1"));
        s.put(Slot::Generated(Task::StoryProposals), generated(Task::StoryProposals));
        s.put(Slot::Selection(Pick::Stories), selected("ストーリー案1"));
        s.put(Slot::Research(Topic::Competitors), research());
        for task in [
            Task::ValueProposition,
            Task::LeanCanvas,
            Task::Mvp,
            Task::Swot,
            Task::FourP,
            Task::ThreeC,
            Task::Financials,
            Task::CompetitorAnalysis,
            Task::MoatProposals,
        ] {
            s.put(Slot::Generated(task), generated(task));
        }
        s.put(Slot::Selection(Pick::Moats), selected("モート案1"));
        let notes = PitchNotes::new([("市場規模", "国内1000億円")]).unwrap();
        s.put(Slot::PitchNotes, SlotValue::Notes(notes));
        s.put(Slot::Generated(Task::PitchDeck), generated(Task::PitchDeck));
        s.put(Slot::Generated(Task::InvestorReview), generated(Task::InvestorReview));
        assert_eq!(s.slots().collect::<Vec<_>>(), Slot::all());
        s
    }

    #[test]
    fn test_step_codes_round_trip() {
        for step in StepId::ALL {
            assert_eq!(StepId::from_code(step.code()), Some(step));
        }
        assert_eq!(StepId::from_code("9"), None);
    }

    #[test]
    fn test_transitions() {
        assert!(StepId::Input.can_transition(StepId::TargetSelection));
        assert!(!StepId::Input.can_transition(StepId::ProblemTriage));
        assert!(StepId::PitchDraft.can_transition(StepId::Input));
        assert!(!StepId::InvestorReview.can_transition(StepId::InvestorReview));
        assert_eq!(StepId::InvestorReview.next(), None);
        assert_eq!(StepId::Input.previous(), None);
    }

    #[test]
    fn test_every_task_belongs_to_one_step() {
        for task in Task::ALL {
            let owners: Vec<_> =
                StepId::ALL.iter().filter(|s| s.entry_tasks().contains(&task)).collect();
            assert_eq!(owners.len(), 1, "{task}");
        }
    }

    #[test]
    fn test_slot_list_is_in_key_order() {
        let mut sorted = Slot::all();
        sorted.sort();
        assert_eq!(sorted, Slot::all());
    }

    #[test]
    fn test_inputs_are_owned_no_later_than_reader() {
        for slot in Slot::all() {
            for input in slot.inputs() {
                assert!(input.owner() <= slot.owner(), "{slot} reads {input}");
            }
        }
    }

    #[test]
    fn test_tech_summary_requires_four_fields() {
        let err = TechSummary::from_input(&TechInput {
            name: "Foo".into(),
            problem: "  ".into(),
            features: "Baz".into(),
            areas: "Widgets".into(),
            supplement: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, WizardError::Validation(ref m) if m.contains("解決したい課題")));
    }

    #[test]
    fn test_tech_summary_render_marks_missing_supplement() {
        let text = summary().render();
        assert!(text.contains("技術の名称: Foo"));
        assert!(text.contains("補足情報: なし"));
    }

    #[test]
    fn test_new_summary_invalidates_everything_downstream() {
        let mut s = filled();
        let mut other = summary();
        other.name = "Qux".into();
        let removed = s.put(Slot::TechSummary, SlotValue::Summary(other));
        // notes are user input and depend on nothing
        assert_eq!(s.slots().collect::<Vec<_>>(), vec![Slot::TechSummary, Slot::PitchNotes]);
        assert!(removed.contains(&Slot::Generated(Task::InvestorReview)));
        assert!(removed.contains(&Slot::Selection(Pick::Moats)));
    }

    #[test]
    fn test_identical_write_keeps_dependents() {
        let mut s = filled();
        let removed = s.put(Slot::TechSummary, SlotValue::Summary(summary()));
        assert!(removed.is_empty());
        assert!(s.result(Task::PitchDeck).is_some());
    }

    #[test]
    fn test_changed_problem_selection_spares_unrelated_slots() {
        let mut s = filled();
        s.put(Slot::Selection(Pick::Problems), selected("課題2"));
        assert!(s.result(Task::ValueProposition).is_none());
        assert!(s.result(Task::LeanCanvas).is_none());
        assert!(s.result(Task::PitchDeck).is_none());
        assert!(s.result(Task::ProblemList).is_some());
        assert!(s.selection(Pick::Targets).is_some());
        assert!(s.pitch_notes().is_some());
    }

    #[test]
    fn test_new_story_selection_invalidates_canvases_and_pitch() {
        let mut s = filled();
        let removed = s.put(Slot::Selection(Pick::Stories), selected("ストーリー案2"));
        assert!(removed.contains(&Slot::Generated(Task::ValueProposition)));
        assert!(removed.contains(&Slot::Generated(Task::LeanCanvas)));
        assert!(removed.contains(&Slot::Generated(Task::PitchDeck)));
        assert!(s.result(Task::StoryProposals).is_some());
        assert!(s.selection(Pick::Problems).is_some());
    }

    #[test]
    fn test_changed_pitch_notes_invalidate_only_pitch_and_review() {
        let mut s = filled();
        let notes = PitchNotes::new([("なぜ今か", "規制緩和")]).unwrap();
        let removed = s.put(Slot::PitchNotes, SlotValue::Notes(notes));
        assert_eq!(removed, vec![Slot::Generated(Task::PitchDeck), Slot::Generated(Task::InvestorReview)]);
        assert!(s.selection(Pick::Moats).is_some());
    }

    #[test]
    fn test_pitch_notes_reject_unknown_topic_and_drop_blanks() {
        let err = PitchNotes::new([("チーム", "x")]).unwrap_err();
        assert!(matches!(err, WizardError::Validation(_)));

        let notes = PitchNotes::new([("競合", "  A社  "), ("市場規模", "   ")]).unwrap();
        assert_eq!(notes.get("競合"), Some("A社"));
        assert_eq!(notes.get("市場規模"), None);
        assert!(PitchNotes::new(Vec::<(String, String)>::new()).unwrap().is_empty());
    }

    #[test]
    fn test_preamble_is_a_unit_and_reaches_context() {
        let mut r = StepResult::parsed(Task::Swot, "全体として有望です。\n### 強み\n速い");
        let labels: Vec<String> = r.units().into_iter().map(|(l, _, _)| l).collect();
        assert_eq!(labels, vec![PREAMBLE.to_string(), "強み".to_string()]);
        assert_eq!(r.context_text().unwrap(), "全体として有望です。\n\n### 強み\n速い");

        assert!(r.apply_edit(PREAMBLE, "慎重に検討すべきです。".into()).unwrap());
        assert!(r.context_text().unwrap().starts_with("慎重に検討すべきです。"));
    }

    #[test]
    fn test_edit_changes_effective_text_and_invalidates() {
        let mut s = filled();
        let key = FieldKey::new(Task::ValueProposition, "a");
        let removed = s.edit(&key, "edited".into()).unwrap();
        assert!(removed.contains(&Slot::Generated(Task::LeanCanvas)));
        assert_eq!(s.result(Task::ValueProposition).unwrap().effective("a").unwrap(), "edited");

        // same text again is not a change
        s.put(Slot::Generated(Task::LeanCanvas), SlotValue::Generated(StepResult::parsed(Task::LeanCanvas, "x")));
        assert!(s.edit(&key, "edited".into()).unwrap().is_empty());
        assert!(s.result(Task::LeanCanvas).is_some());
    }

    #[test]
    fn test_edit_unknown_label_is_validation_error() {
        let mut s = filled();
        let err = s.edit(&FieldKey::new(Task::Swot, "missing"), "x".into()).unwrap_err();
        assert!(matches!(err, WizardError::Validation(_)));
    }

    #[test]
    fn test_clear_after_keeps_owned_slots() {
        let mut s = filled();
        s.clear_after(StepId::TargetSelection);
        assert!(s.contains(Slot::TechSummary));
        assert!(s.contains(Slot::Generated(Task::TargetStrategy)));
        assert!(s.contains(Slot::Selection(Pick::Targets)));
        assert!(!s.contains(Slot::Generated(Task::ProblemList)));
        assert!(!s.contains(Slot::Generated(Task::InvestorReview)));
    }

    #[test]
    fn test_failed_result_has_no_context() {
        let err = GenerationError::EmptyResponse { provider: "gemini" };
        let r = StepResult::failed(Task::Swot, &err);
        assert!(r.is_failed());
        assert_eq!(r.raw, GENERATION_FAILED);
        assert_eq!(r.context_text(), None);
    }

    #[test]
    fn test_field_key_display() {
        let key = FieldKey::new(Task::LeanCanvas, "課題");
        assert_eq!(key.to_string(), "2.2/lean_canvas/課題");
    }

    #[test]
    fn test_session_serializes_slots_as_entries() {
        let s = filled();
        let json = serde_json::to_value(&s).unwrap();
        let slots = json["slots"].as_array().unwrap();
        assert!(slots.iter().any(|e| e["slot"] == "tech_summary" && e["value"]["kind"] == "summary"));
    }

    #[test]
    fn test_store_checkout_and_put() {
        let store = SessionStore::new();
        let id = store.create();
        let mut s = store.checkout(id).unwrap();
        s.put(Slot::TechSummary, SlotValue::Summary(summary()));
        store.put(s);
        assert!(store.checkout(id).unwrap().tech_summary().is_some());
        assert_eq!(store.len(), 1);

        store.with(id, |s| s.reset()).unwrap();
        assert!(store.checkout(id).unwrap().tech_summary().is_none());
        assert!(store.with(Uuid::new_v4(), |s| s.current()).is_none());
        store.remove(id);
        assert!(store.is_empty());
    }
}
