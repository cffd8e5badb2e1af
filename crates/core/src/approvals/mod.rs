pub mod activation;
pub mod engine;
pub mod evaluator;

pub use activation::{activate_after, initialize_decisions, position};
pub use engine::ApprovalEngine;
pub use evaluator::{
    evaluate_decision, evaluate_decision_with, Evaluation, EvaluatorOptions,
    RequiredApproverPolicy, Resolution, Tally,
};
