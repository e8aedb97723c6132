//! Stage-1 inputs: reference-answer parsing and the built-in question set.

use crate::record::{Record, ANSWER, QUESTION};

/// Marker preceding the final answer in a raw reference.
pub const ANSWER_MARKER: &str = "####";

/// Reference used by the built-in questions.
pub const DEFAULT_REFERENCE: &str = "#### This is a mental health question";

const DEFAULT_QUESTIONS: [&str; 10] = [
    "I've been feeling really anxious lately and I'm not sure why. I find myself worrying about everything, even small things. How can I manage this constant anxiety?",
    "I had a panic attack last week and I'm terrified of having another one. What can I do if I feel one coming on?",
    "I'm having trouble sleeping at night. My mind keeps racing with thoughts and I can't seem to relax. What techniques might help me sleep better?",
    "I feel like I'm stuck in my life. I'm not happy with my job but I'm scared to make a change. How do I find the courage to move forward?",
    "I had a big argument with my partner and we said hurtful things to each other. How can we repair our relationship and communicate better?",
    "I've been feeling really down lately. I don't enjoy things I used to and I'm struggling to get through each day. What should I do?",
    "I'm worried about my teenage child who seems withdrawn and irritable. How can I approach them and offer support without pushing them away?",
    "I've been through a recent trauma and I'm having flashbacks and nightmares. Is this normal and what can I do to cope?",
    "I feel overwhelmed with work and family responsibilities. I never have time for myself and I'm burning out. How can I find better balance?",
    "I struggle with negative self-talk and always criticize myself harshly. How can I be kinder to myself and improve my self-esteem?",
];

/// Segment after the first `####` marker (up to any second one), trimmed.
/// `None` without a marker.
pub fn extract_hash_answer(reference: &str) -> Option<&str> {
    reference.split(ANSWER_MARKER).nth(1).map(str::trim)
}

/// Raw stage-1 records for the built-in client concerns.
pub fn default_questions() -> Vec<Record> {
    DEFAULT_QUESTIONS
        .iter()
        .map(|q| {
            Record::new()
                .with_text(QUESTION, *q)
                .with_text(ANSWER, DEFAULT_REFERENCE)
        })
        .collect()
}
