use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Typesetter,
    Ghostscript,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Typesetter => "typesetting engine",
            Tool::Ghostscript => "Ghostscript",
        }
    }

    pub fn install_hint(&self) -> &'static str {
        match self {
            Tool::Typesetter => {
                "Please install a LaTeX distribution (TeX Live or MiKTeX) and ensure it is on PATH."
            }
            Tool::Ghostscript => {
                "Please install Ghostscript and ensure 'gs', 'gswin64c' or 'gswin32c' is on PATH."
            }
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{executable} not found. {}", .tool.install_hint())]
    ToolMissing { tool: Tool, executable: String },

    // Empty when the log carries no `! ` marker.
    #[error("{0}")]
    CompileFailed(String),

    #[error("The typesetting engine hung and was terminated.")]
    CompileTimedOut,

    #[error("Could not extract a bounding box. Empty expression?")]
    EmptyExpression,

    #[error("{0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl RenderError {
    pub(crate) fn tool_missing(tool: Tool, executable: impl Into<String>) -> Self {
        RenderError::ToolMissing {
            tool,
            executable: executable.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::ToolMissing { .. } => "tool_missing",
            RenderError::CompileFailed(_) => "compile_failed",
            RenderError::CompileTimedOut => "compile_timed_out",
            RenderError::EmptyExpression => "empty_expression",
            RenderError::Unexpected(_) => "unexpected",
        }
    }
}
