/// Round-robin pool of API keys for one provider.
///
/// Built fresh for each job run; the cursor is not shared across runs.
#[derive(Debug, Clone)]
pub struct ApiKeyPool {
    keys: Vec<String>,
    cursor: usize,
    /// Index handed out by the latest `next()`
    last: Option<usize>,
}

impl ApiKeyPool {
    /// Primary key first, then spares in order. Blank entries and duplicates
    /// are dropped.
    pub fn new<I, S>(primary: Option<&str>, spares: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = Vec::new();
        let candidates = primary
            .map(str::to_string)
            .into_iter()
            .chain(spares.into_iter().map(|s| s.as_ref().to_string()));
        for key in candidates {
            let key = key.trim().to_string();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        ApiKeyPool {
            keys,
            cursor: 0,
            last: None,
        }
    }

    /// Split a comma-separated spare list as found in env vars.
    pub fn from_config(primary: Option<&str>, spares: Option<&str>) -> Self {
        Self::new(primary, spares.unwrap_or_default().split(','))
    }

    /// Key at the cursor, advancing it. `None` means no key is configured,
    /// which is fatal for the request rather than retryable.
    pub fn next(&mut self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.keys.len();
        self.last = Some(idx);
        Some(&self.keys[idx])
    }

    /// Key most recently returned by `next()`.
    pub fn current(&self) -> Option<&str> {
        self.last.map(|idx| self.keys[idx].as_str())
    }

    /// Make the primary key the next one handed out.
    pub fn reset_to_primary(&mut self) {
        self.cursor = 0;
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(pool: &mut ApiKeyPool, n: usize) -> Vec<String> {
        (0..n).filter_map(|_| pool.next().map(str::to_string)).collect()
    }

    #[test]
    fn test_empty_pool_signals_unavailable() {
        let mut pool = ApiKeyPool::new(None, Vec::<String>::new());
        assert_eq!(pool.size(), 0);
        assert!(pool.next().is_none());
    }

    #[test]
    fn test_single_key_repeats() {
        let mut pool = ApiKeyPool::new(Some("only"), Vec::<String>::new());
        assert_eq!(cycle(&mut pool, 3), vec!["only", "only", "only"]);
    }

    #[test]
    fn test_three_keys_cycle_before_repeating() {
        let mut pool = ApiKeyPool::from_config(Some("a"), Some("b,c"));
        assert_eq!(pool.size(), 3);
        assert_eq!(cycle(&mut pool, 4), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_duplicates_and_blanks_removed() {
        let pool = ApiKeyPool::from_config(Some("a"), Some(" a , ,b,b "));
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_spares_only() {
        let mut pool = ApiKeyPool::from_config(None, Some("x,y"));
        assert_eq!(cycle(&mut pool, 2), vec!["x", "y"]);
    }

    #[test]
    fn test_current_tracks_last_key_handed_out() {
        let mut pool = ApiKeyPool::from_config(Some("a"), Some("b"));
        assert_eq!(pool.current(), None);
        pool.next();
        assert_eq!(pool.current(), Some("a"));
        pool.next();
        assert_eq!(pool.current(), Some("b"));
        pool.next();
        assert_eq!(pool.current(), Some("a"));
    }

    #[test]
    fn test_current_on_empty_pool() {
        let mut pool = ApiKeyPool::new(None, Vec::<String>::new());
        pool.next();
        assert_eq!(pool.current(), None);
    }

    #[test]
    fn test_reset_to_primary() {
        let mut pool = ApiKeyPool::from_config(Some("a"), Some("b,c"));
        pool.next();
        pool.next();
        pool.reset_to_primary();
        assert_eq!(pool.current(), Some("b"));
        assert_eq!(pool.next(), Some("a"));
    }

    #[test]
    fn test_fresh_pool_per_run_starts_at_primary() {
        let config = (Some("a"), Some("b,c"));
        let mut first = ApiKeyPool::from_config(config.0, config.1);
        first.next();
        first.next();
        let mut second = ApiKeyPool::from_config(config.0, config.1);
        assert_eq!(second.next(), Some("a"));
    }
}
