pub mod doctor;
pub mod evidence;
pub mod onboard;
pub mod serve;
pub mod status;
