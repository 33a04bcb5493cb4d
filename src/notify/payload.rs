//! Reminder payload builder.

use serde::{Deserialize, Serialize};

use crate::tasks::{Plant, Task, TaskType};

/// Label used in the body when the task has no (resolvable) plant.
const GENERIC_TARGET: &str = "your plants";

/// Rendered notification content, ready for a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub title: String,
    pub body: String,
    /// Task ID; lets a tap open the task.
    pub target_id: String,
}

/// Compose the reminder for `task`, naming `plant` when known.
///
/// Pure and total: identical inputs give identical output, and task types
/// this build does not know render a generic reminder.
pub fn build_payload(task: &Task, plant: Option<&Plant>) -> ReminderPayload {
    let target = plant
        .map(Plant::display_name)
        .unwrap_or_else(|| GENERIC_TARGET.to_string());

    let action = match task.task_type {
        TaskType::Watering => Some(("Watering due", "Time to water")),
        TaskType::Feeding => Some(("Feeding due", "Time to feed")),
        TaskType::Inspection => Some(("Inspection due", "Time to inspect")),
        TaskType::Pruning => Some(("Pruning due", "Time to prune")),
        TaskType::Harvest => Some(("Harvest due", "Time to harvest")),
        TaskType::Custom | TaskType::Other(_) => None,
    };

    let (title, body) = match action {
        Some((title, verb)) => {
            let body = match task.title.as_deref() {
                Some(note) => format!("{verb} {target}: {}", sentence(note)),
                None => format!("{verb} {target}."),
            };
            (title.to_string(), body)
        }
        None => match task.title.as_deref() {
            Some(label) => (label.to_string(), format!("{label} is due for {target}.")),
            None => ("Task due".to_string(), format!("A task is due for {target}.")),
        },
    };

    ReminderPayload {
        title,
        body,
        target_id: task.id.clone(),
    }
}

/// Terminate `text` with a period unless it already ends a sentence.
fn sentence(text: &str) -> String {
    let text = text.trim_end();
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn task(task_type: TaskType) -> Task {
        Task::new(task_type, Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap()).with_id("t1")
    }

    #[test]
    fn watering_with_plant() {
        let plant = Plant::new("p1", "Blue Dream", "B12");
        let payload = build_payload(&task(TaskType::Watering).with_plant("p1"), Some(&plant));
        assert_eq!(payload.title, "Watering due");
        assert_eq!(payload.body, "Time to water Blue Dream (Batch B12).");
        assert_eq!(payload.target_id, "t1");
    }

    #[test]
    fn inspection_without_plant_is_generic() {
        let payload = build_payload(&task(TaskType::Inspection), None);
        assert_eq!(payload.title, "Inspection due");
        assert_eq!(payload.body, "Time to inspect your plants.");
    }

    #[test]
    fn titled_feeding_appends_note() {
        let plant = Plant::new("p2", "Gelato", "G4");
        let payload = build_payload(&task(TaskType::Feeding).with_title("Bloom boost"), Some(&plant));
        assert_eq!(payload.body, "Time to feed Gelato (Batch G4): Bloom boost.");
    }

    #[test]
    fn note_punctuation_is_not_doubled() {
        let payload = build_payload(&task(TaskType::Pruning).with_title("Top it now!"), None);
        assert_eq!(payload.body, "Time to prune your plants: Top it now!");

        let payload = build_payload(&task(TaskType::Watering).with_title("Light feed. "), None);
        assert_eq!(payload.body, "Time to water your plants: Light feed.");
    }

    #[test]
    fn custom_uses_task_title() {
        let payload = build_payload(&task(TaskType::Custom).with_title("Check humidity"), None);
        assert_eq!(payload.title, "Check humidity");
        assert_eq!(payload.body, "Check humidity is due for your plants.");
    }

    #[test]
    fn unknown_type_falls_back() {
        let payload = build_payload(&task(TaskType::Other("defoliation".into())), None);
        assert_eq!(payload.title, "Task due");
        assert_eq!(payload.body, "A task is due for your plants.");
        assert_eq!(payload.target_id, "t1");
    }

    #[test]
    fn build_is_deterministic() {
        let plant = Plant::new("p1", "Blue Dream", "B12");
        let t = task(TaskType::Harvest).with_plant("p1");
        let a = serde_json::to_vec(&build_payload(&t, Some(&plant))).unwrap();
        let b = serde_json::to_vec(&build_payload(&t, Some(&plant))).unwrap();
        assert_eq!(a, b);
    }
}
