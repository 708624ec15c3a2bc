// Crawl pipeline: advance every tracked account's cursor, round after round.

pub mod crawl;
