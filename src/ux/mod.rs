use async_trait::async_trait;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::errors::{GenerationError, WizardError};
use crate::parse::Parsed;
use crate::provider::{DynProvider, Provider};
use crate::session::{FieldKey, PitchNotes, Session, StepId, TechInput, Topic, PITCH_NOTE_TOPICS};
use crate::wizard::{Action, Report};

/// ========================================
/// Spinner
/// ========================================

/// Shows a spinner on stderr while the wrapped provider is working.
pub struct SpinnerProvider {
    inner: DynProvider,
}

impl SpinnerProvider {
    pub fn new(inner: DynProvider) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Provider for SpinnerProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("AIが生成中です ({})...", self.inner.name()));
        bar.enable_steady_tick(Duration::from_millis(120));
        let out = self.inner.generate(prompt).await;
        bar.finish_and_clear();
        out
    }
}

/// ========================================
/// Rendering
/// ========================================

pub fn print_banner(provider: &str, search: bool) {
    println!("\n{}", "━━━━━━━━━━━━━━━ 事業アイデア創出ウィザード ━━━━━━━━━━━━━━━".bold());
    println!(
        "  provider: {}   web search: {}",
        provider.cyan(),
        if search { "on".green() } else { "off".dimmed() }
    );
    println!("  {}", "h でコマンド一覧を表示します".dimmed());
}

pub fn print_step(session: &Session) {
    let step = session.current();
    println!("\n{} {}", format!("[{}]", step.code()).cyan().bold(), step.title().bold());

    if let Some(topic) = step.research() {
        print_research(session, topic);
    }

    for &task in step.entry_tasks() {
        let Some(result) = session.result(task) else { continue };
        if result.is_failed() {
            println!("\n{} {}", task.label().bold(), "生成に失敗しました (r で再試行)".red());
            if let Some(reason) = &result.failure {
                println!("  {}", reason.dimmed());
            }
            continue;
        }
        if step.entry_tasks().len() > 1 {
            println!("\n{}", format!("■ {}", task.label()).bold());
        }
        if let Parsed::Scored(scored) = &result.parsed {
            println!(
                "  {} {}   {}",
                "スコア:".yellow().bold(),
                scored.card.display().yellow(),
                scored.card.rationale.dimmed()
            );
        }
    }

    if step == StepId::PitchDraft {
        print_notes(session.pitch_notes());
    }

    let fields = session.fields(step);
    for (i, field) in fields.iter().enumerate() {
        let edited = session
            .result(field.key.task)
            .is_some_and(|r| r.edits.contains_key(&field.key.label));
        let mark = if edited { " (編集済み)".green().to_string() } else { String::new() };
        println!("\n{} {}{}", format!("{:>2}.", i + 1).cyan(), field.title.bold(), mark);
        println!("{}", indent(&field.text, 4));
    }
    println!();
    println!("{}", hint(step).dimmed());
}

fn print_notes(notes: Option<&PitchNotes>) {
    let Some(notes) = notes.filter(|n| !n.is_empty()) else {
        println!("  {}", "補足情報: なし (n で入力できます)".dimmed());
        return;
    };
    println!("  {}", "補足情報:".dimmed());
    for topic in PITCH_NOTE_TOPICS {
        if let Some(note) = notes.get(topic) {
            println!("   - {}: {}", topic, note);
        }
    }
}

fn print_research(session: &Session, topic: Topic) {
    let Some(research) = session.research(topic) else { return };
    if research.hits.is_empty() {
        let note = research.note.as_deref().unwrap_or("検索結果なし");
        println!("  {} {}", "web検索:".dimmed(), note.dimmed());
        return;
    }
    println!("  {} {}", "web検索:".dimmed(), research.query.dimmed());
    for hit in &research.hits {
        println!("   - {} {}", hit.title, hit.url.dimmed());
    }
}

fn hint(step: StepId) -> &'static str {
    match step {
        StepId::Input => "技術概要を入力してください",
        s if s.pick().is_some() => "s <番号...> で選択して次へ / e <番号> で編集 / b で戻る",
        StepId::InvestorReview => "b <ステップ> で戻って修正 / restart で最初から / q で終了",
        StepId::PitchDraft => "c で次へ / n で補足情報を入力して再生成 / e <番号> で編集 / b で戻る",
        _ => "c で次へ / e <番号> で編集 / r で失敗した生成を再試行 / b で戻る",
    }
}

pub fn print_report(report: &Report) {
    if !report.invalidated.is_empty() {
        let slots: Vec<String> = report.invalidated.iter().map(|s| s.to_string()).collect();
        tracing::info!(slots = %slots.join(", "), "invalidated");
        println!("{} {}", "再生成が必要になった項目:".yellow(), slots.join(", ").dimmed());
    }
    for (task, err) in &report.failures {
        println!("{} {}: {}", "✗".red().bold(), task.label().bold(), err.to_string().red());
    }
}

pub fn print_error(err: &WizardError) {
    match err {
        WizardError::Validation(msg) => println!("{} {}", "!".yellow().bold(), msg.yellow()),
        other => println!("{} {}", "error:".red().bold(), other.to_string().red()),
    }
}

pub fn print_quick_pitch(text: &str) {
    println!("\n{}", "━━━━━━━━━━━━━━━ ピッチ資料ドラフト ━━━━━━━━━━━━━━━".bold());
    println!("{text}");
}

pub fn print_help() {
    println!(
        "{}",
        r#"  s <番号...>   候補を選択して次へ (例: s 1 3)
  e <番号>      表示中の項目を編集 (空行に . だけを入力して終了)
  c             次のステップへ
  r             失敗した生成を再試行
  n             ピッチ資料の補足情報を入力 (ステップ 5)
  b [ステップ]  前のステップ (または 1, 1.2, 2.1 ... ) へ戻る
  p             現在のステップを再表示
  restart       最初からやり直す
  q             終了"#
    );
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.lines().map(|l| format!("{pad}{l}")).collect::<Vec<_>>().join("\n")
}

/// ========================================
/// Input
/// ========================================

/// What the user typed at the command prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Act(Action),
    /// Edit needs the replacement text read separately.
    Edit(FieldKey),
    /// Pitch notes are read one topic at a time.
    Notes,
    Show,
    Help,
    Quit,
}

/// Maps a command line to a command. Field numbers refer to the order of [`print_step`].
pub fn parse_command(line: &str, session: &Session) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Command::Show);
    };
    let rest: Vec<&str> = words.collect();
    let step = session.current();
    let fields = session.fields(step);
    let field_at = |arg: &str| -> Result<FieldKey, String> {
        let n: usize = arg.parse().map_err(|_| format!("番号ではありません: {arg}"))?;
        n.checked_sub(1)
            .and_then(|i| fields.get(i))
            .map(|f| f.key.clone())
            .ok_or_else(|| format!("{n} 番の項目はありません"))
    };

    match head {
        "s" | "select" => {
            let Some((_, candidates)) = step.pick() else {
                return Err("このステップでは選択できません".into());
            };
            let mut names = Vec::new();
            for &arg in &rest {
                let key = field_at(arg)?;
                if key.task != candidates {
                    return Err(format!("{arg} 番は選択候補ではありません"));
                }
                names.push(key.label);
            }
            Ok(Command::Act(Action::Choose(names)))
        }
        "e" | "edit" => match rest.as_slice() {
            [n] => Ok(Command::Edit(field_at(*n)?)),
            _ => Err("使い方: e <番号>".into()),
        },
        "n" | "notes" if step == StepId::PitchDraft => Ok(Command::Notes),
        "n" | "notes" => Err("補足情報はステップ 5 で入力します".into()),
        "c" | "continue" => Ok(Command::Act(Action::Continue)),
        "r" | "retry" => Ok(Command::Act(Action::Retry)),
        "b" | "back" => {
            let target = match rest.first() {
                Some(code) => StepId::from_code(code).ok_or_else(|| format!("不明なステップ: {code}"))?,
                None => step.previous().ok_or("これ以上戻れません")?,
            };
            Ok(Command::Act(Action::Back(target)))
        }
        "restart" => Ok(Command::Act(Action::Restart)),
        "p" | "show" => Ok(Command::Show),
        "h" | "help" | "?" => Ok(Command::Help),
        "q" | "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("不明なコマンド: {other} (h でヘルプ)")),
    }
}

pub fn prompt_line(label: &str) -> io::Result<Option<String>> {
    print!("{} ", label.bold());
    io::stdout().flush()?;
    let mut s = String::new();
    if io::stdin().read_line(&mut s)? == 0 {
        return Ok(None);
    }
    Ok(Some(s.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads lines until a line holding only `.`. `None` on end of input.
pub fn read_multiline<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut lines = Vec::new();
    loop {
        let mut s = String::new();
        if reader.read_line(&mut s)? == 0 {
            return Ok(if lines.is_empty() { None } else { Some(lines.join("\n")) });
        }
        let line = s.trim_end_matches(['\r', '\n']);
        if line == "." {
            return Ok(Some(lines.join("\n")));
        }
        lines.push(line.to_string());
    }
}

/// Asks for a note on every pitch topic. An empty answer keeps the previous note and
/// `-` clears it. `None` on end of input.
pub fn read_pitch_notes(previous: Option<&PitchNotes>) -> io::Result<Option<Vec<(String, String)>>> {
    println!("{}", "(空のまま Enter で前回の値を維持、- で削除)".dimmed());
    let mut entries = Vec::new();
    for topic in PITCH_NOTE_TOPICS {
        let old = previous.and_then(|n| n.get(topic)).unwrap_or_default();
        let label = if old.is_empty() { format!("{topic}:") } else { format!("{topic} [{old}]:") };
        let Some(answer) = prompt_line(&label)? else { return Ok(None) };
        let note = match answer.trim() {
            "" => old.to_string(),
            "-" => String::new(),
            text => text.to_string(),
        };
        entries.push((topic.to_string(), note));
    }
    Ok(Some(entries))
}

/// Asks for the technology summary fields. `None` on end of input.
pub fn read_tech_input(previous: Option<&TechInput>) -> io::Result<Option<TechInput>> {
    println!("{}", "(* は必須。前回の値を残す場合は空のまま Enter)".dimmed());
    let ask = |label: &str, old: Option<&str>| -> io::Result<Option<String>> {
        let shown = match old {
            Some(v) if !v.is_empty() => format!("{label} [{v}]:"),
            _ => format!("{label}:"),
        };
        Ok(prompt_line(&shown)?.map(|v| match old {
            Some(o) if v.trim().is_empty() => o.to_string(),
            _ => v,
        }))
    };
    let prev = previous.cloned().unwrap_or_default();
    let Some(name) = ask("* 技術の名称", Some(&prev.name))? else { return Ok(None) };
    let Some(problem) = ask("* 解決したい課題", Some(&prev.problem))? else { return Ok(None) };
    let Some(features) = ask("* 技術的な特徴・新規性", Some(&prev.features))? else { return Ok(None) };
    let Some(areas) = ask("* 応用できそうな分野・用途", Some(&prev.areas))? else { return Ok(None) };
    let Some(supplement) = ask("  補足情報", Some(&prev.supplement))? else { return Ok(None) };
    Ok(Some(TechInput { name, problem, features, areas, supplement }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Slot, SlotValue, StepResult, Task};

    fn at_targets() -> Session {
        let mut s = Session::new();
        s.put(
            Slot::Generated(Task::TargetStrategy),
            SlotValue::Generated(StepResult::parsed(
                Task::TargetStrategy,
                "**ターゲット案1: A**\n* a\n\n**ターゲット案2: B**\n* b\n\n**ターゲット案3: C**\n* c",
            )),
        );
        s.set_current(StepId::TargetSelection);
        s
    }

    #[test]
    fn select_maps_numbers_to_item_names() {
        let s = at_targets();
        let cmd = parse_command("s 1 3", &s).unwrap();
        assert_eq!(cmd, Command::Act(Action::Choose(vec!["ターゲット案1".into(), "ターゲット案3".into()])));
        assert!(parse_command("s 4", &s).is_err());
        assert!(parse_command("s x", &s).is_err());
    }

    #[test]
    fn edit_and_back() {
        let s = at_targets();
        assert_eq!(
            parse_command("e 2", &s).unwrap(),
            Command::Edit(FieldKey::new(Task::TargetStrategy, "ターゲット案2"))
        );
        assert_eq!(parse_command("b", &s).unwrap(), Command::Act(Action::Back(StepId::Input)));
        assert_eq!(parse_command("b 1", &s).unwrap(), Command::Act(Action::Back(StepId::Input)));
        assert!(parse_command("b 7", &s).is_err());
        assert!(parse_command("n", &s).is_err());
        assert_eq!(parse_command("  ", &s).unwrap(), Command::Show);
        assert_eq!(parse_command("q", &s).unwrap(), Command::Quit);
    }

    #[test]
    fn notes_only_on_pitch_draft() {
        let mut s = Session::new();
        s.set_current(StepId::PitchDraft);
        assert_eq!(parse_command("n", &s).unwrap(), Command::Notes);
        assert!(parse_command("s 1", &s).is_err());
    }

    #[test]
    fn multiline_stops_at_dot() {
        let mut input = io::Cursor::new("一行目\n二行目\n.\n残り\n");
        assert_eq!(read_multiline(&mut input).unwrap().as_deref(), Some("一行目\n二行目"));
        let mut empty = io::Cursor::new("");
        assert_eq!(read_multiline(&mut empty).unwrap(), None);
    }
}
