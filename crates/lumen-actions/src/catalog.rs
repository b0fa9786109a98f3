//! Built-in action catalog.
//!
//! Declaration order is part of the contract: when a query contains phrases
//! of several actions, the earliest declared one wins. Specific actions are
//! therefore listed before general ones, and `open_app` comes last.

use chrono::Local;

use crate::action::AppAction;

/// The general "open an application" action. It matches with a looser
/// semantic threshold because its handler resolves the app name itself.
pub const OPEN_APP_ACTION_ID: &str = "open_app";

const LAUNCH_VERBS: &[&str] = &["open", "launch", "start", "run"];
const FILLER_WORDS: &[&str] = &["the", "app", "application", "please", "my", "now", "up"];

pub fn default_catalog() -> Vec<AppAction> {
    vec![
        AppAction::new(
            "take_photo",
            &["take a photo", "take photo", "take a picture", "snap a picture"],
            "Opening the camera to take a photo.",
        ),
        AppAction::new(
            "open_camera",
            &["open camera", "open the camera", "launch camera"],
            "Opening the camera.",
        ),
        AppAction::new(
            "toggle_flashlight",
            &["turn on the flashlight", "turn on flashlight", "toggle flashlight"],
            "Toggling the flashlight.",
        )
        .hidden_from_chat(),
        AppAction::new(
            "set_alarm",
            &["set an alarm", "set alarm", "wake me up at"],
            "Opening the alarm clock.",
        ),
        AppAction::new(
            "set_timer",
            &["set a timer", "set timer", "start a timer"],
            "Opening the timer.",
        ),
        AppAction::new(
            "current_time",
            &["what time is it", "current time", "tell me the time"],
            "I can't read the clock right now.",
        )
        .with_handler(|_| Some(Local::now().format("It's %H:%M.").to_string())),
        AppAction::new(
            "current_date",
            &["what is the date today", "today's date", "what day is it"],
            "I can't read the calendar right now.",
        )
        .with_handler(|_| Some(Local::now().format("Today is %A, %B %-d, %Y.").to_string())),
        AppAction::new(
            "open_settings",
            &["open settings", "open the settings", "device settings"],
            "Opening settings.",
        ),
        AppAction::new(
            OPEN_APP_ACTION_ID,
            &["open the app", "open application", "launch app", "start app"],
            "Which app should I open?",
        )
        .with_handler(|query| app_name(query).map(|name| format!("Opening {}.", name))),
    ]
}

/// Extract the application name from an open-app query: the words after the
/// launch verb, minus filler.
fn app_name(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();
    let verb = words.iter().position(|w| LAUNCH_VERBS.contains(w))?;
    let name: Vec<&str> = words[verb + 1..]
        .iter()
        .copied()
        .filter(|w| !FILLER_WORDS.contains(w))
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name.join(" "))
    }
}
