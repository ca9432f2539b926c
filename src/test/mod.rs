
mod accounts;
mod entries;
mod sessions;
