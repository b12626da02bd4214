use crate::model_service::OutputTensor;
use std::fmt;

pub const EMOTION_CLASS_COUNT: usize = 7;

/// The seven classes the model scores, in the model's output order,
/// plus a sentinel for output the decoder cannot interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
    Unknown,
}

impl Emotion {
    pub const CLASS_ORDER: [Emotion; EMOTION_CLASS_COUNT] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "Angry",
            Emotion::Disgust => "Disgust",
            Emotion::Fear => "Fear",
            Emotion::Happy => "Happy",
            Emotion::Neutral => "Neutral",
            Emotion::Sad => "Sad",
            Emotion::Surprise => "Surprise",
            Emotion::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable argmax over the class scores: on exact ties the lowest index
/// wins. Output of the wrong length decodes to `Unknown`, never an error.
pub fn decode(output: &OutputTensor) -> Emotion {
    let scores = output.scores();
    if scores.len() != EMOTION_CLASS_COUNT {
        tracing::warn!(
            len = scores.len(),
            "malformed model output, expected {} scores",
            EMOTION_CLASS_COUNT
        );
        return Emotion::Unknown;
    }

    let mut best = 0;
    let mut best_score = scores[0];
    for (index, &score) in scores.iter().enumerate().skip(1) {
        if score > best_score {
            best = index;
            best_score = score;
        }
    }

    Emotion::CLASS_ORDER[best]
}
