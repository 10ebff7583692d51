//! Message texts and inline keyboards.

use crate::tag::EventTag;
use pitchside_conversation::{Commit, Domain, Prompt, Rejection, Step};
use pitchside_scheduler::{Button, Challenge, ChallengeSource, Member, Occurrence, OutboundMessage, Team};

/// Reply for events whose conversation is gone.
pub const NO_LONGER_ACTIVE: &str = "This is no longer active.";

const BUTTONS_PER_ROW: usize = 5;

fn back_button() -> Button {
    Button::new("⬅ Back to menu", EventTag::BackToMenu.to_string())
}

fn question(step: Step) -> String {
    match step {
        Step::Energy => "🌞 Morning poll\n\n1/4: Energy level (1-10)".to_string(),
        Step::Sleep => "🌞 Morning poll\n\n2/4: Sleep quality (1-10)".to_string(),
        Step::Ready => "🌞 Morning poll\n\n3/4: Readiness for training (1-10)".to_string(),
        Step::Mood => "🌞 Morning poll\n\n4/4: Mood".to_string(),
        Step::SelfRating => "🌙 Evening poll\n\nRate your own training (1-10)".to_string(),
        Step::Lim(_) => "LIM: choose a value (0-4)".to_string(),
        Step::T2(_) => "T2: choose a value (0-3)".to_string(),
        Step::Eiq(_) => "EIQ: choose a value (0-2)".to_string(),
        Step::Attribute(attribute) => format!("{}: choose a value (0-10)", attribute.label()),
    }
}

/// Renders the prompt for a conversation's current step.
///
/// Every button carries the step it answers, so a press on an outdated
/// keyboard is recognized as stale.
#[must_use]
pub fn prompt(prompt: &Prompt, subject: Option<&str>) -> OutboundMessage {
    let mut text = String::new();
    match prompt.step {
        Step::Lim(_) | Step::T2(_) | Step::Eiq(_) => {
            text.push_str("📝 Post-training rating\n\n");
        }
        Step::Attribute(_) => text.push_str("🛠 Player attributes\n\n"),
        _ => {}
    }
    if let Some(name) = subject {
        text.push_str(&format!("Player: {name}\n"));
    }
    if let Some((index, total)) = prompt.position {
        text.push_str(&format!("{}/{}\n", index + 1, total));
    }
    if prompt.subject.is_some() || prompt.position.is_some() {
        text.push('\n');
    }
    text.push_str(&question(prompt.step));
    if let Some(current) = prompt.current {
        text.push_str(&format!("\nCurrent value: {current}"));
    }

    let buttons: Vec<Button> = prompt
        .domain
        .choices()
        .into_iter()
        .map(|value| {
            let data = EventTag::answer(prompt.kind, prompt.step, value.clone()).to_string();
            Button::new(label(prompt.domain, &value), data)
        })
        .collect();

    let mut message = OutboundMessage::text(text);
    for row in buttons.chunks(BUTTONS_PER_ROW) {
        message = message.with_row(row.to_vec());
    }
    message
}

fn label(domain: Domain, value: &str) -> String {
    match (domain, value) {
        (Domain::Mood, "happy") => "😄".to_string(),
        (Domain::Mood, "good") => "🙂".to_string(),
        (Domain::Mood, "ok") => "😐".to_string(),
        (Domain::Mood, "bad") => "🙁".to_string(),
        (Domain::Mood, "sad") => "😢".to_string(),
        _ => value.to_string(),
    }
}

/// Final message shown in place of the prompt when a conversation completes.
#[must_use]
pub fn completed(commit: &Commit) -> OutboundMessage {
    let text = match commit {
        Commit::MorningPoll(answers) => format!(
            "✅ Thanks! Morning poll saved. +{} points.",
            answers.points
        ),
        Commit::EveningPoll(_) => "✅ Thanks! Evening poll saved.".to_string(),
        Commit::CoachRating(_) => "✅ Ratings saved for every player.".to_string(),
        Commit::Attributes(_) => "✅ Attributes saved.".to_string(),
    };
    OutboundMessage::text(text).with_row(vec![back_button()])
}

/// Short toast explaining why an input was not accepted.
#[must_use]
pub fn rejection(rejection: &Rejection) -> String {
    match rejection {
        Rejection::StaleStep { .. } | Rejection::Superseded => {
            "That answer was already handled.".to_string()
        }
        Rejection::NotANumber { .. } => "Please send a number.".to_string(),
        Rejection::OutOfRange { min, max, .. } => format!("Choose a value from {min} to {max}."),
        Rejection::UnknownMood { .. } => "Choose one of the offered moods.".to_string(),
        Rejection::Exhausted => NO_LONGER_ACTIVE.to_string(),
    }
}

/// Reminder sent to players shortly before training.
#[must_use]
pub fn reminder(team: &Team, occurrence: &Occurrence) -> OutboundMessage {
    OutboundMessage::text(format!(
        "⏰ Reminder: {} trains today at {}.\nBring water, boots and a winning attitude!",
        team.name,
        occurrence.start.format("%H:%M")
    ))
}

/// A player's challenge for the upcoming training.
#[must_use]
pub fn challenge(challenge: &Challenge) -> OutboundMessage {
    let source = match challenge.source {
        ChallengeSource::Coach => "coach",
        ChallengeSource::Generated => "bot",
    };
    OutboundMessage::text(format!(
        "🔥 Challenge for training\n\n🎯 {}\nSource: {source}\n\n⚠️ Your coach confirms completion after training.",
        challenge.text
    ))
    .with_row(vec![back_button()])
}

/// Challenge digest sent to coaches, one `name: challenge` line per player.
#[must_use]
pub fn coach_digest(team: &Team, occurrence: &Occurrence, entries: &[(String, String)]) -> OutboundMessage {
    let mut text = format!(
        "🎯 Player challenges for training\nTeam: {}\nTime: {}\n\n",
        team.name,
        occurrence.start.format("%H:%M")
    );
    if entries.is_empty() {
        text.push_str("No challenges assigned.");
    }
    for (i, (name, challenge)) in entries.iter().enumerate() {
        text.push_str(&format!("{}. {name}: {challenge}\n", i + 1));
    }
    OutboundMessage::text(text.trim_end()).with_row(vec![back_button()])
}

/// Quote sent on days without training.
#[must_use]
pub fn daily_notice(quote: &str) -> OutboundMessage {
    OutboundMessage::text(format!("💬 Quote of the day\n\n{quote}"))
}

/// Main menu. Coaches get one button per player to edit attributes.
#[must_use]
pub fn menu(players: &[Member]) -> OutboundMessage {
    if players.is_empty() {
        return OutboundMessage::text("🏠 Main menu\n\nNothing to do right now.");
    }
    let mut message = OutboundMessage::text("🏠 Main menu\n\nChoose a player to edit attributes:");
    for player in players {
        message = message.with_row(vec![Button::new(
            player.display_name(),
            EventTag::EditAttributes {
                player: player.user_id,
            }
            .to_string(),
        )]);
    }
    message
}
