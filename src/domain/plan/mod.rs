pub mod sleep_plan;
