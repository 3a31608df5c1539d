pub mod name_match;
