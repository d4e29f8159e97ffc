pub mod fic_decoder;
pub mod fig_processor;
pub mod fig_database_handler;
