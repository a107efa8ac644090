//! Headline sources feeding the news intent.
//!
//! Each source module exports `fetch_headlines(...)` returning
//! `Vec<Headline>`; the model then decides which headlines describe
//! building projects.
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | Google News search | [`google_news`] | RSS 2.0 feed |

pub mod google_news;
