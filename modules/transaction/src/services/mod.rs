pub mod cancelation_service;
pub mod listener_service;
pub mod reconcile;
pub mod saga_service;
pub mod scheduler_service;
