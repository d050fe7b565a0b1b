use crate::models::{ChatMode, Conversation, MediaDescriptor, Role};

pub fn export_to_markdown(conversation: &Conversation) -> String {
    let mut output = format!("# {}\n\n", conversation.title);
    output.push_str(&format!(
        "> Mode: {} | Date: {}\n\n",
        conversation.mode.as_str(),
        conversation.created_at.format("%Y-%m-%d %H:%M")
    ));

    if !conversation.participants.is_empty() {
        let ids: Vec<&str> = conversation.participants.iter().map(|p| p.as_str()).collect();
        output.push_str(&format!("> Participants: {}\n\n", ids.join(", ")));
    }
    if !conversation.tags.is_empty() {
        output.push_str(&format!("> Tags: {}\n\n", conversation.tags.join(", ")));
    }

    output.push_str("---\n\n");

    for msg in conversation.messages.iter().filter(|m| !m.is_streaming) {
        let role_label = match (&msg.role, &msg.speaker) {
            (Role::User, _) => "You".to_string(),
            (Role::Assistant, Some(speaker)) => speaker.to_string(),
            (Role::Assistant, None) => "Assistant".to_string(),
        };
        let star = if msg.is_favorite { " ★" } else { "" };
        output.push_str(&format!("### {}{}\n\n", role_label, star));

        let media = match conversation.mode {
            ChatMode::Image | ChatMode::Video if msg.role == Role::Assistant => {
                MediaDescriptor::parse(&msg.content)
            }
            _ => None,
        };
        match media {
            Some(media) if conversation.mode == ChatMode::Image => {
                output.push_str(&format!("![{}]({})\n\n", media.prompt, media.url));
            }
            Some(media) => {
                output.push_str(&format!("[{}]({})\n\n", media.prompt, media.url));
            }
            None => output.push_str(&format!("{}\n\n", msg.content)),
        }

        for attachment in &msg.attachments {
            output.push_str(&format!("> Attachment: {}\n\n", attachment.name));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::Message;

    #[test]
    fn test_export_renders_roles_and_media() {
        let mut chat = Conversation::new(ChatMode::Chat, "Greetings");
        chat.tags = vec!["work".into()];
        chat.messages.push(Message::user("hello", Vec::new()));
        let mut reply = Message::assistant("hi there");
        reply.is_favorite = true;
        chat.messages.push(reply);
        chat.messages.push(Message::placeholder());

        let md = export_to_markdown(&chat);
        assert!(md.starts_with("# Greetings\n\n> Mode: chat"));
        assert!(md.contains("> Tags: work"));
        assert!(md.contains("### You\n\nhello"));
        assert!(md.contains("### Assistant ★\n\nhi there"));
        assert_eq!(md.matches("### ").count(), 2);

        let mut image = Conversation::new(ChatMode::Image, "Fox");
        let descriptor = MediaDescriptor {
            url: "https://media.test/fox".into(),
            prompt: "a fox".into(),
            model: "flux".into(),
            timestamp: Utc::now(),
        };
        image
            .messages
            .push(Message::assistant(serde_json::to_string(&descriptor).unwrap()));
        assert!(export_to_markdown(&image).contains("![a fox](https://media.test/fox)"));
    }
}
