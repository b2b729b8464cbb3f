use mdscatter::engine::configurators::Parameters;

/// A job name with its fully merged parameters, ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job: String,
    pub parameters: Parameters,
}
