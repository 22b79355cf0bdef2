pub mod tick_log;
