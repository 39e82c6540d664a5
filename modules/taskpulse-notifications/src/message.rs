use taskpulse_common::events::ReminderDue;

/// Subject and body of a reminder notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

pub fn render_reminder(reminder: &ReminderDue) -> RenderedMessage {
    RenderedMessage {
        subject: format!("Reminder: {}", reminder.title),
        body: format!(
            "Your task \"{}\" is due at {} UTC.",
            reminder.title,
            reminder.due_at.format("%Y-%m-%d %H:%M")
        ),
    }
}
