use serde::{Deserialize, Serialize};

use tb_core::{
    EndpointId, EnvironmentParameters, ReportSection, TestExecutionResult, TestExecutionState,
    TestStep, UploadToken,
};

/// What an endpoint exposes once signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Commands,
    Notifications,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Commands => "commands",
            Self::Notifications => "notifications",
        };
        write!(f, "{s}")
    }
}

/// Remotely invocable operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    // ── controller-exposed ──
    Execute {
        steps: Vec<TestStep>,
        environment: EnvironmentParameters,
        calling_endpoint: EndpointId,
        upload_token: UploadToken,
    },
    State,
    /// Controller: stop the associated worker. Worker: stop itself.
    Terminate,
    TestCase,
    EnvironmentParameters,
    PrepareTestFilesForTransfer,
    PrepareReportFilesForTransfer {
        step_order: u32,
        calling_endpoint: EndpointId,
        upload_token: UploadToken,
    },

    // ── served by every host's broker ──
    Download {
        token: UploadToken,
        offset: u64,
        length: u32,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "Execute",
            Self::State => "State",
            Self::Terminate => "Terminate",
            Self::TestCase => "TestCase",
            Self::EnvironmentParameters => "EnvironmentParameters",
            Self::PrepareTestFilesForTransfer => "PrepareTestFilesForTransfer",
            Self::PrepareReportFilesForTransfer { .. } => "PrepareReportFilesForTransfer",
            Self::Download { .. } => "Download",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Ack,
    State(TestExecutionState),
    TestCase(Vec<TestStep>),
    EnvironmentParameters(EnvironmentParameters),
    Token(UploadToken),
    Chunk { data: Vec<u8>, eof: bool },
}

impl Reply {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ack => "Ack",
            Self::State(_) => "State",
            Self::TestCase(_) => "TestCase",
            Self::EnvironmentParameters(_) => "EnvironmentParameters",
            Self::Token(_) => "Token",
            Self::Chunk { .. } => "Chunk",
        }
    }
}

/// Fire-and-forget events raised by an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    ExecutionProgress {
        section_group: String,
        section: ReportSection,
    },
    TestCompletion {
        result: TestExecutionResult,
    },
}

/// Unit of the wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Hello { endpoint: EndpointId },
    SignIn { capability: Capability },
    Request { id: u64, command: Command },
    Response { id: u64, outcome: Result<Reply, String> },
    Notification(Notification),
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::SignIn { .. } => "sign-in",
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Notification(_) => "notification",
        }
    }
}
