pub(crate) mod backend;
pub(crate) mod execution_unit;
pub(crate) mod instruction_status;
pub(crate) mod register_file;
pub(crate) mod register_status;
pub(crate) mod reservation_station;
