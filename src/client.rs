use chrono::NaiveDateTime;
use reqwest::StatusCode;

use crate::api::*;
use crate::error::FlowError;

/// Client for the remote schedule/prediction service.
#[derive(Clone)]
pub struct PredictionApi {
    url: String,
    client: reqwest::Client,
}
impl PredictionApi {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    /// Fetches the upcoming schedule and normalizes it.
    ///
    /// Idempotent and side-effect free, safe to retry freely.
    pub async fn fetch_schedule(&self) -> Result<Vec<Event>, FlowError> {
        let response = self
            .client
            .get(self.url.clone() + "/schedule")
            .send()
            .await
            .map_err(|e| FlowError::ScheduleFetch(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(FlowError::ScheduleFetch(format!(
                "{}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        let body = response
            .json::<ScheduleResponse>()
            .await
            .map_err(|e| FlowError::ScheduleFetch(e.to_string()))?;
        if !body.success {
            return Err(FlowError::ScheduleFetch(
                "schedule endpoint reported failure".to_string(),
            ));
        }
        Ok(normalize_schedule(body.schedule))
    }
    /// Fetches the prediction payload for one event.
    ///
    /// Only called by the flow once access is confirmed.
    pub async fn fetch_prediction(&self, event: EventId) -> Result<Prediction, FlowError> {
        let response = self
            .client
            .get(format!("{}/predict/{}", self.url, event))
            .send()
            .await
            .map_err(|e| FlowError::PredictionUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FlowError::PredictionUnavailable(format!(
                "{}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        let body = response
            .json::<PredictResponse>()
            .await
            .map_err(|e| FlowError::PredictionUnavailable(e.to_string()))?;
        if !body.success {
            return Err(FlowError::PredictionUnavailable(
                body.error
                    .unwrap_or_else(|| "prediction service reported failure".to_string()),
            ));
        }
        body.prediction.ok_or_else(|| {
            FlowError::PredictionUnavailable("malformed response: missing prediction".to_string())
        })
    }
}

/// Drops entries missing either team name and orders the rest by kickoff.
///
/// Date and time are read as one chronological point (`%Y-%m-%d %H:%M`).
/// An entry whose date/time does not parse sorts after every parsable
/// one; ties break by id so the order is deterministic.
pub fn normalize_schedule(mut schedule: Vec<Event>) -> Vec<Event> {
    schedule.retain(|event| !event.home_team.is_empty() && !event.away_team.is_empty());
    schedule.sort_by_key(|event| (kickoff(event).unwrap_or(NaiveDateTime::MAX), event.id));
    schedule
}
fn kickoff(event: &Event) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(
        format!("{} {}", event.date, event.time).as_str(),
        "%Y-%m-%d %H:%M",
    )
    .ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn event(id: EventId, home: &str, away: &str, date: &str, time: &str) -> Event {
        Event {
            id,
            home_team: home.to_string(),
            away_team: away.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            stadium: "".to_string(),
            city: "".to_string(),
            status: "".to_string(),
        }
    }

    #[test]
    fn entries_missing_a_team_are_dropped() {
        let schedule = vec![
            event(1, "Chiefs", "", "2024-09-08", "13:00"),
            event(2, "", "Ravens", "2024-09-08", "13:00"),
            event(3, "Bills", "Jets", "2024-09-09", "20:15"),
        ];
        let normalized = normalize_schedule(schedule);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].id, 3);
    }

    #[test]
    fn schedule_is_sorted_by_kickoff() {
        let schedule = vec![
            event(2, "Eagles", "Packers", "2024-09-10", "20:00"),
            event(1, "Chiefs", "Ravens", "2024-09-08", "13:00"),
            event(3, "Lions", "Rams", "2024-09-08", "16:25"),
        ];
        let normalized = normalize_schedule(schedule);
        assert_eq!(
            normalized.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![1, 3, 2]
        );
    }

    #[test]
    fn unparsable_kickoff_sorts_last() {
        let schedule = vec![
            event(7, "Bears", "Vikings", "TBD", ""),
            event(4, "Chiefs", "Ravens", "2024-09-08", "13:00"),
            event(9, "Jets", "Bills", "", ""),
        ];
        let normalized = normalize_schedule(schedule);
        assert_eq!(
            normalized.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![4, 7, 9]
        );
    }
}
