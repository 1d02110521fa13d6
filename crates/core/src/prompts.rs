//! Prompt construction for the tutoring flow.
//!
//! All prompts live here so the wording that the classifier depends on
//! (forced YES/NO and bare-number formats) is defined in exactly one place.

/// System instruction for open-ended tutoring replies.
pub const TUTOR_INSTRUCTION: &str =
    "You are an expert educational tutor guiding a step-by-step revision session.";

/// System instruction for forced YES/NO classification calls.
pub const CLASSIFIER_INSTRUCTION: &str = "You are a precise classifier. Reply only YES or NO.";

/// System instruction for forced numeric scoring calls.
pub const EVALUATOR_INSTRUCTION: &str = "You are a precise evaluator. Reply only with a number.";

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn end_intent(user_text: &str) -> String {
    format!(
        "Does the user want to end or stop the learning session? Reply only \"YES\" or \"NO\"\n\n\
         User input: \"{user_text}\"\n\n\
         Reply only: YES or NO"
    )
}

pub fn is_question(user_text: &str) -> String {
    format!(
        "Is this user input a question that needs an educational answer? Reply only \"YES\" or \"NO\"\n\n\
         User input: \"{user_text}\"\n\n\
         Consider it a question if the user is asking for explanation or clarification, \
         seeking help understanding something, requesting more information, or expressing confusion.\n\n\
         Reply only: YES or NO"
    )
}

pub fn answer_score(question: &str, answer: &str, context: &str) -> String {
    format!(
        "Evaluate how well the student answered the question below.\n\n\
         Question: {question}\n\
         Student's answer: {answer}\n\
         Reference material: {}\n\n\
         Give a score from 0.0 to 1.0 where:\n\
         - 0.0 = all wrong or no attempt\n\
         - 0.3 = poor understanding, mostly wrong\n\
         - 0.5 = some understanding, half correct\n\
         - 0.7 = good understanding, mostly correct\n\
         - 1.0 = excellent, all correct\n\n\
         Reply with just the number (e.g., 0.7)",
        excerpt(context, 400)
    )
}

pub fn topic_introduction(topic: &str, subtopic_count: usize) -> String {
    format!(
        "Introduce the topic \"{topic}\" which has {subtopic_count} concepts to learn.\n\n\
         Give a one sentence overview of what this topic covers, mention that we'll learn \
         step-by-step with quick checks, and end with: \"Ready to start with the first concept?\" \
         Be encouraging and keep to 2-3 lines total."
    )
}

pub fn step_explanation(title: &str, content: &str, step: u8, total_steps: u8) -> String {
    let focus = match step {
        1 => "Start with the basic definition and what this concept is about",
        2 => "Explain how it works or the main process or mechanism",
        3 => "Give a simple example or real-world application",
        _ => "Continue explaining the concept",
    };
    let closing = if step == total_steps {
        "\nSince this is the last step, add \"Got that so far?\""
    } else {
        "\nDon't ask questions yet, just explain."
    };
    format!(
        "You are explaining \"{title}\" step by step.\n\n\
         Content: {}\n\n\
         This is message {step} of {total_steps}.\n\
         Focus for this message: {focus}.\n\n\
         Explain just this step in 1-2 simple sentences, in easy language a student can \
         understand.{closing}",
        excerpt(content, 400)
    )
}

pub fn check_question(title: &str, content: &str) -> String {
    format!(
        "Create ONE simple question to check if the student understood \"{title}\".\n\n\
         Content: {}\n\n\
         Ask one clear, simple question focused on the main concept only. Keep it to one \
         line and don't explain, just ask the question.",
        excerpt(content, 300)
    )
}

pub fn answer_feedback(answer: &str, passed: bool, concept: &str) -> String {
    if passed {
        format!(
            "The student answered correctly about \"{concept}\".\n\
             Student's answer: \"{answer}\"\n\n\
             Give positive feedback in one line, briefly confirm what they got right, and \
             say \"Great! Let's move to the next concept.\" Keep to 2 lines total."
        )
    } else {
        format!(
            "The student's answer about \"{concept}\" needs improvement.\n\
             Student's answer: \"{answer}\"\n\n\
             Be gentle and encouraging, give a quick hint or correction, and say \
             \"No worries! Let's continue to the next concept.\" Keep to 2 lines total."
        )
    }
}

pub fn user_question_response(question: &str, context: &str) -> String {
    format!(
        "Student asked: \"{question}\"\n\n\
         Context content: {context}\n\n\
         Answer their question briefly and clearly in 1-2 lines, using the context to give \
         accurate info. End with \"Does that help? Ready to continue learning?\""
    )
}

pub fn next_concept_transition(title: &str, progress: &str) -> String {
    format!(
        "Moving to the next concept: \"{title}\"\n\
         Current progress: {progress}\n\n\
         Give a brief one line transition like \"Now let's learn about {title}\". Keep it \
         smooth and encouraging, and don't explain yet."
    )
}

pub fn auto_quiz(topic: &str, concepts: &[String], difficulty: &str) -> String {
    format!(
        "Create a short {difficulty} quiz about \"{topic}\" covering these concepts: {}.\n\n\
         Ask 2-3 short questions the student can answer in one message. Number the \
         questions and keep each to one line.",
        concepts.join(", ")
    )
}

pub fn quiz_feedback(answers: &str, topic: &str, remedial: bool) -> String {
    let direction = if remedial {
        "Point out the weakest areas gently and suggest revisiting them before moving on."
    } else {
        "Congratulate them briefly and confirm they are ready to keep going."
    };
    format!(
        "The student submitted these quiz answers about \"{topic}\":\n{answers}\n\n\
         Give short feedback in 2-3 lines. {direction}"
    )
}
