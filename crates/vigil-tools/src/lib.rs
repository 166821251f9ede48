// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod policy;
pub mod registry;
pub mod tool;

pub use policy::{LayeredToolPolicy, PermissionTier, PolicyLayer};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart, ToolPermission};

pub use builtin::ask_question::{AskQuestionTool, Question, QuestionRequest};
pub use builtin::glob_file_search::GlobFileSearchTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::run_terminal_command::RunTerminalCommandTool;
pub use builtin::web_fetch::WebFetchTool;
pub use builtin::web_search::WebSearchTool;
pub use builtin::write::WriteTool;
