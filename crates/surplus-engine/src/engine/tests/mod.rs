mod commit;
mod common;
