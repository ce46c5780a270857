// ============================================================
// Layer 5 — Knowledge Distillation
// ============================================================
// The teacher runs on the inner (non-autodiff) backend, so its
// forward pass builds no graph and never receives gradients.
// Its logits are lifted back onto the autodiff backend as a
// constant and blended into the student's loss:
//
//   p_t = softmax(teacher / T)     log p_s = log_softmax(student / T)
//   KL  = Σ p_t · (log p_t − log p_s)           (mean over the batch)
//   L   = alpha · T² · KL + (1 − alpha) · CE(student, labels)
//
// T² keeps the soft-target gradients on the same scale as the
// hard-label ones when the temperature changes.
//
// Reference: Hinton et al. (2015) "Distilling the Knowledge in a Neural Network"

use burn::{
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
    tensor::{activation::log_softmax, backend::AutodiffBackend},
};

use crate::domain::distillation::DistillationConfig;
use crate::domain::error::CompressionError;
use crate::ml::model::{ClassifierShape, TextClassifier};

#[derive(Debug, Clone, Copy)]
pub struct DistillationLoss {
    pub temperature: f64,
    pub alpha: f64,
}

impl DistillationLoss {
    pub fn new(config: &DistillationConfig) -> Self {
        Self { temperature: config.temperature, alpha: config.alpha }
    }

    /// KL(teacher_T || student_T) averaged over the batch.
    pub fn soft_loss<B: Backend>(&self, student: Tensor<B, 2>, teacher: Tensor<B, 2>) -> Tensor<B, 1> {
        let t = self.temperature;
        let log_p_s = log_softmax(student.div_scalar(t), 1);
        let log_p_t = log_softmax(teacher.div_scalar(t), 1);
        let p_t = log_p_t.clone().exp();
        (p_t * (log_p_t - log_p_s)).sum_dim(1).mean()
    }

    pub fn forward<B: Backend>(
        &self,
        student: Tensor<B, 2>,
        teacher: Tensor<B, 2>,
        labels:  Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let ce = CrossEntropyLossConfig::new()
            .init(&student.device())
            .forward(student.clone(), labels);
        let t2 = self.temperature * self.temperature;
        let kl = self.soft_loss(student, teacher);
        kl.mul_scalar(self.alpha * t2) + ce.mul_scalar(1.0 - self.alpha)
    }
}

pub struct Distiller<B: AutodiffBackend> {
    teacher: TextClassifier<B::InnerBackend>,
    loss:    DistillationLoss,
}

impl<B: AutodiffBackend> Distiller<B> {
    /// The teacher sees the student's batches unchanged, so it must
    /// predict as many classes and accept every id and length the
    /// student's inputs can contain.
    pub fn new(
        teacher: TextClassifier<B::InnerBackend>,
        config:  &DistillationConfig,
        student: ClassifierShape,
    ) -> Result<Self, CompressionError> {
        check_teacher(teacher.shape(), student)?;
        Ok(Self { teacher, loss: DistillationLoss::new(config) })
    }

    pub fn teacher_logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        Tensor::from_inner(self.teacher.forward(input_ids.inner(), attention_mask.inner()))
    }

    pub fn loss(
        &self,
        student_logits: Tensor<B, 2>,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels:         Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let teacher = self.teacher_logits(input_ids, attention_mask);
        self.loss.forward(student_logits, teacher, labels)
    }
}

fn check_teacher(teacher: ClassifierShape, student: ClassifierShape) -> Result<(), CompressionError> {
    let problem = if teacher.num_labels != student.num_labels {
        format!("teacher predicts {} labels, student {}", teacher.num_labels, student.num_labels)
    } else if teacher.vocab_size < student.vocab_size {
        format!("teacher embeds {} token ids, student inputs use up to {}", teacher.vocab_size, student.vocab_size)
    } else if teacher.max_seq_len < student.max_seq_len {
        format!("teacher accepts {} positions, student sequences have {}", teacher.max_seq_len, student.max_seq_len)
    } else {
        return Ok(());
    };
    Err(CompressionError::IncompatibleTeacher(problem))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::{tiny_config, tiny_inputs};
    use crate::ml::model::ClassifierConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::ElementConversion;

    type B = NdArray;

    fn scalar(t: Tensor<B, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    fn logits(values: [f32; 6]) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape([2, 3])
    }

    fn labels() -> Tensor<B, 1, Int> {
        Tensor::<B, 1, Int>::from_ints([2, 0], &Default::default())
    }

    #[test]
    fn test_alpha_zero_is_plain_cross_entropy() {
        let loss = DistillationLoss { temperature: 4.0, alpha: 0.0 };
        let student = logits([0.2, -1.0, 1.5, 0.3, 0.1, -0.4]);
        let teacher = logits([3.0, 0.0, -3.0, 1.0, 2.0, 0.0]);
        let ce = CrossEntropyLossConfig::new()
            .init(&Default::default())
            .forward(student.clone(), labels());
        let got = scalar(loss.forward(student, teacher, labels()));
        assert!((got - scalar(ce)).abs() < 1e-5);
    }

    #[test]
    fn test_kl_vanishes_when_student_matches_teacher() {
        let loss = DistillationLoss { temperature: 2.0, alpha: 1.0 };
        let same = logits([0.2, -1.0, 1.5, 0.3, 0.1, -0.4]);
        let got = scalar(loss.forward(same.clone(), same, labels()));
        assert!(got.abs() < 1e-5);
    }

    #[test]
    fn test_kl_is_positive_when_distributions_differ() {
        let loss = DistillationLoss { temperature: 1.0, alpha: 1.0 };
        let student = logits([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let teacher = logits([5.0, 0.0, 0.0, 0.0, 5.0, 0.0]);
        assert!(scalar(loss.soft_loss(student, teacher)) > 0.1);
    }

    fn shape(vocab_size: usize, max_seq_len: usize, num_labels: usize) -> ClassifierShape {
        ClassifierShape { vocab_size, max_seq_len, num_labels }
    }

    #[test]
    fn test_teacher_must_share_label_count() {
        let device = Default::default();
        let teacher: TextClassifier<NdArray> = tiny_config().init(&device);
        let config = DistillationConfig::new("unused");
        assert!(Distiller::<Autodiff<NdArray>>::new(teacher.clone(), &config, shape(128, 8, 3)).is_ok());
        assert!(matches!(
            Distiller::<Autodiff<NdArray>>::new(teacher, &config, shape(128, 8, 2)),
            Err(CompressionError::IncompatibleTeacher(_))
        ));
    }

    #[test]
    fn test_teacher_must_cover_student_inputs() {
        let device = Default::default();
        let small: TextClassifier<NdArray> = ClassifierConfig { vocab_size: 64, ..tiny_config() }.init(&device);
        let short: TextClassifier<NdArray> = ClassifierConfig { max_seq_len: 4, ..tiny_config() }.init(&device);
        let config = DistillationConfig::new("unused");

        let err = Distiller::<Autodiff<NdArray>>::new(small, &config, shape(128, 8, 3)).err().unwrap();
        assert!(err.to_string().contains("token ids"), "{err}");
        let err = Distiller::<Autodiff<NdArray>>::new(short, &config, shape(128, 8, 3)).err().unwrap();
        assert!(err.to_string().contains("positions"), "{err}");

        // a larger teacher is fine
        let big: TextClassifier<NdArray> =
            ClassifierConfig { vocab_size: 256, max_seq_len: 16, ..tiny_config() }.init(&device);
        assert!(Distiller::<Autodiff<NdArray>>::new(big, &config, shape(128, 8, 3)).is_ok());
    }

    #[test]
    fn test_distillation_loss_backpropagates_through_student() {
        type AB = Autodiff<NdArray>;
        let device = Default::default();
        let teacher: TextClassifier<NdArray> = tiny_config().init(&device);
        let student: TextClassifier<AB> = tiny_config().init(&device);
        let distiller = Distiller::<AB>::new(teacher, &DistillationConfig::new("unused"), student.shape()).unwrap();

        let (ids, mask) = tiny_inputs::<AB>(&device);
        let student_logits = student.forward(ids.clone(), mask.clone());
        let labels = Tensor::<AB, 1, Int>::from_ints([0, 1], &device);
        let loss = distiller.loss(student_logits, ids, mask, labels);
        let value: f64 = loss.clone().into_scalar().elem::<f64>();
        assert!(value.is_finite() && value > 0.0);
        let _grads = loss.backward();
    }
}
