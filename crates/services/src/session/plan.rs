use exam_core::model::{ExamManifest, QuestionId, SessionId};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Computes the question order for one attempt.
///
/// When the manifest asks for randomized questions the shuffle is seeded
/// from the session id, so a reload mid-exam reproduces the exact order the
/// student has been working through. Attempts with different session ids
/// get different orders.
#[must_use]
pub fn attempt_question_order(manifest: &ExamManifest, session_id: SessionId) -> Vec<QuestionId> {
    let mut order: Vec<QuestionId> = manifest.question_ids().to_vec();
    if manifest.settings().randomize_questions() {
        let (hi, lo) = session_id.value().as_u64_pair();
        let mut rng = StdRng::seed_from_u64(hi ^ lo);
        order.shuffle(&mut rng);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{ExamId, ProctorSettings};

    fn manifest(randomize: bool) -> ExamManifest {
        let questions: Vec<QuestionId> =
            (0..20).map(|n| QuestionId::new(format!("q-{n}"))).collect();
        let settings = ProctorSettings::relaxed().with_randomize_questions(randomize);
        ExamManifest::new(
            ExamId::new("exam-1"),
            "Midterm",
            questions,
            Some(3600),
            settings,
        )
        .unwrap()
    }

    #[test]
    fn order_is_stable_for_one_session() {
        let manifest = manifest(true);
        let session_id = SessionId::new();

        let first = attempt_question_order(&manifest, session_id);
        let second = attempt_question_order(&manifest, session_id);
        assert_eq!(first, second);
    }

    #[test]
    fn order_is_a_permutation_of_the_manifest() {
        let manifest = manifest(true);
        let order = attempt_question_order(&manifest, SessionId::new());

        let mut sorted = order.clone();
        sorted.sort();
        let mut expected = manifest.question_ids().to_vec();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn manifest_order_is_kept_when_shuffling_is_off() {
        let manifest = manifest(false);
        let order = attempt_question_order(&manifest, SessionId::new());
        assert_eq!(order, manifest.question_ids());
    }
}
