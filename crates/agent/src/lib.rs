//! Agent Adapters - outbound collaborators used by command handlers
//!
//! - **Natural language** (`natural`) - free text → tagged event action via an
//!   OpenAI-compatible chat completions endpoint
//! - **Calendar sources** (`calendar_source`) - iCalendar feed fetcher with a minimal
//!   VEVENT reader
//!
//! # Safety Principle
//!
//! The model is strictly a translator. Its output is validated like any other user input
//! and nothing is written without the user confirming a flow prompt.

pub mod calendar_source;
pub mod natural;

pub use calendar_source::{CalendarSource, CalendarSourceError, FetchedCalendar, HttpCalendarSource, SourceEvent};
pub use natural::{
    ChatCompletionClient, EventContext, NaturalAction, NaturalError, NaturalInput, NaturalLanguageClient,
    NaturalOutput, ScriptedNaturalClient,
};
