pub const HOST_CACHE_SIZE: usize = 8;

const MAX_NAME: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCacheEntry {
    pub name: String,
    pub map: String,
    pub users: u8,
    pub max_users: u8,
    pub driver: usize,
    /// Address to hand to the driver's `connect`.
    pub cname: String,
}

/// Servers discovered by the last `slist`.
#[derive(Debug, Default)]
pub struct HostCache {
    entries: Vec<HostCacheEntry>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= HOST_CACHE_SIZE
    }

    pub fn entries(&self) -> &[HostCacheEntry] {
        &self.entries
    }

    pub fn contains_address(&self, cname: &str) -> bool {
        self.entries.iter().any(|e| e.cname == cname)
    }

    /// Adds a server, truncating its name and suffixing a digit when the name
    /// is already taken. Returns false when the cache is full or the address
    /// is already known.
    pub fn add(&mut self, mut entry: HostCacheEntry) -> bool {
        if self.is_full() || self.contains_address(&entry.cname) {
            return false;
        }

        entry.name = truncate(&entry.name, MAX_NAME);
        entry.map = truncate(&entry.map, MAX_NAME);

        while self
            .entries
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(&entry.name))
        {
            bump_name(&mut entry.name);
        }

        self.entries.push(entry);
        true
    }

    /// Resolves a server name (case-insensitive) to its connect address.
    pub fn resolve(&self, host: &str) -> Option<&HostCacheEntry> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(host))
    }

    pub fn log_table(&self) {
        for entry in &self.entries {
            if entry.max_users > 0 {
                log::info!(
                    "{:<15} {:<15} {:2}/{:2}",
                    entry.name,
                    entry.map,
                    entry.users,
                    entry.max_users
                );
            } else {
                log::info!("{:<15} {:<15}", entry.name, entry.map);
            }
        }
    }
}

/// "server" becomes "server0", "server0" becomes "server1".
fn bump_name(name: &mut String) {
    let count = name.chars().count();
    match name.chars().last() {
        Some(last) if count < MAX_NAME && last > '8' => name.push('0'),
        Some(last) => {
            name.pop();
            name.push(char::from_u32(last as u32 + 1).unwrap_or('0'));
        }
        None => name.push('0'),
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, cname: &str) -> HostCacheEntry {
        HostCacheEntry {
            name: name.to_string(),
            map: "start".to_string(),
            users: 1,
            max_users: 8,
            driver: 1,
            cname: cname.to_string(),
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let mut cache = HostCache::new();
        assert!(cache.add(entry("Deathmatch", "10.0.0.1:26000")));
        assert_eq!(
            cache.resolve("deathmatch").map(|e| e.cname.as_str()),
            Some("10.0.0.1:26000")
        );
        assert!(cache.resolve("coop").is_none());
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let mut cache = HostCache::new();
        cache.add(entry("server", "10.0.0.1:26000"));
        cache.add(entry("server", "10.0.0.2:26000"));
        cache.add(entry("server", "10.0.0.3:26000"));
        let names: Vec<&str> = cache.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["server", "server0", "server1"]);
    }

    #[test]
    fn test_same_address_ignored_and_capacity() {
        let mut cache = HostCache::new();
        assert!(cache.add(entry("a", "addr")));
        assert!(!cache.add(entry("b", "addr")));
        for i in 1..HOST_CACHE_SIZE {
            assert!(cache.add(entry(&format!("s{i}"), &format!("addr{i}"))));
        }
        assert!(cache.is_full());
        assert!(!cache.add(entry("late", "late")));
    }
}
