pub mod integration;
pub mod outcome;
pub mod task;
pub mod work_item;
