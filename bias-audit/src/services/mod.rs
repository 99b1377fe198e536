//! Collaborator clients

pub mod backend;
pub mod http_backend;
pub mod results_service;

pub use backend::{
    AuditBackend, AuditConfiguration, AuditResponse, AuditSubmission, BackendError,
    PerformanceAssessment, PreviewRequest, PreviewTables, SampleRequest, SessionRequest,
};
pub use http_backend::HttpBackend;
pub use results_service::ResultsService;
