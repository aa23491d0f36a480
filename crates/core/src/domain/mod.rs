pub mod calendar;
pub mod event;
pub mod kanban;
pub mod user;
