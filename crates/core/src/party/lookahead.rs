//! Next-episode lookahead

use super::model::Episode;

/// Compute the episode that follows `current` in `catalog`
///
/// Tries the next episode number in the same season first, then the
/// lowest-numbered episode of the next season ordinal. Episodes of other
/// series are ignored.
pub fn next_episode(current: &Episode, catalog: &[Episode]) -> Option<Episode> {
    let same_series = catalog
        .iter()
        .filter(|e| e.series_id == current.series_id && e.id != current.id);

    let mut next_in_season = None;
    let mut first_of_next_season: Option<&Episode> = None;

    for episode in same_series {
        if episode.season_number == current.season_number
            && episode.episode_number == current.episode_number + 1
        {
            next_in_season = Some(episode);
        } else if episode.season_number == current.season_number + 1 {
            let better = first_of_next_season
                .map(|best| episode.episode_number < best.episode_number)
                .unwrap_or(true);
            if better {
                first_of_next_season = Some(episode);
            }
        }
    }

    next_in_season.or(first_of_next_season).cloned()
}
