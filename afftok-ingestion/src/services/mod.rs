pub mod click_service;
pub mod postback_service;
