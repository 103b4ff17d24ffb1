// ============================================================
// Layer 3 — Fine-Grained Role Catalog
// ============================================================
// The closed set of 22 entity roles the classifier may emit,
// and the task instruction that embeds them.
//
// The instruction is built once and shared by every example:
// the reformatter writes it into each record, the sequence
// encoder places it in the system turn of the chat prompt.
//
// The catalog is rendered in Python list notation
// (['Guardian', 'Martyr', ...]) because that is the exact
// prompt text the model sees during fine-tuning and inference.

use std::sync::OnceLock;

/// Every valid fine-grained role, in catalog order.
pub const ROLE_CATALOG: [&str; 22] = [
    "Guardian",
    "Martyr",
    "Peacemaker",
    "Rebel",
    "Underdog",
    "Virtuous",
    "Instigator",
    "Conspirator",
    "Tyrant",
    "Foreign Adversary",
    "Traitor",
    "Spy",
    "Saboteur",
    "Corrupt",
    "Incompetent",
    "Terrorist",
    "Deceiver",
    "Bigot",
    "Forgotten",
    "Exploited",
    "Victim",
    "Scapegoat",
];

const INSTRUCTION_PREAMBLE: &str = "You are an expert in the field of multi label classification. \
Given an article and an entity within that article. \
What you need to do is analyze this article and the entity, and provide the fine-grained roles of the entity. \
There are more than one fine-grained role. \
If there are multiple roles, they should be followed directly in the output, separated by spaces.\
List of fine-grained role:";

static INSTRUCTION: OnceLock<String> = OnceLock::new();

/// The task description shared by every formatted example.
pub fn instruction() -> &'static str {
    INSTRUCTION.get_or_init(|| format!("{INSTRUCTION_PREAMBLE}{}", catalog_literal()))
}

/// `['Guardian', 'Martyr', ...]`
fn catalog_literal() -> String {
    let quoted: Vec<String> = ROLE_CATALOG.iter().map(|r| format!("'{r}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Returns the labels of a whitespace-separated output that are not in
/// the catalog. Multi-word roles ("Foreign Adversary") are matched first.
///
/// Used only to report unseen labels; outputs are never rewritten.
pub fn unknown_labels(output: &str) -> Vec<String> {
    let mut rest = output.to_string();
    for role in ROLE_CATALOG.iter().filter(|r| r.contains(' ')) {
        rest = rest.replace(role, " ");
    }
    rest.split_whitespace()
        .filter(|w| !ROLE_CATALOG.contains(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_22_unique_roles() {
        let mut roles = ROLE_CATALOG.to_vec();
        roles.sort();
        roles.dedup();
        assert_eq!(roles.len(), 22);
    }

    #[test]
    fn test_instruction_embeds_python_style_list() {
        let text = instruction();
        assert!(text.ends_with("List of fine-grained role:['Guardian', 'Martyr', 'Peacemaker', 'Rebel', 'Underdog', 'Virtuous', 'Instigator', 'Conspirator', 'Tyrant', 'Foreign Adversary', 'Traitor', 'Spy', 'Saboteur', 'Corrupt', 'Incompetent', 'Terrorist', 'Deceiver', 'Bigot', 'Forgotten', 'Exploited', 'Victim', 'Scapegoat']"));
        assert!(text.contains("separated by spaces.List of"));
    }

    #[test]
    fn test_instruction_is_shared() {
        assert!(std::ptr::eq(instruction(), instruction()));
    }

    #[test]
    fn test_unknown_labels() {
        assert!(unknown_labels("Peacemaker Guardian").is_empty());
        assert!(unknown_labels("Foreign Adversary Spy").is_empty());
        assert_eq!(unknown_labels("Hero Victim"), vec!["Hero".to_string()]);
    }
}
