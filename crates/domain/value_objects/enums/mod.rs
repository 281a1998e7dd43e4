pub mod subscription_statuses;
