//! Calendar partitioning of an archived chat.
//!
//! Months and days are recomputed from the store on every build and
//! bucketed in the configured display timezone. Each day remembers the
//! page its first message lands on so templates can deep-link into the
//! paginated output.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Datelike, Days, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{Day, Month};
use crate::store::Store;

pub struct Timeline {
    tz: FixedOffset,
    months: Vec<Month>,
    days: BTreeMap<NaiveDate, Vec<Day>>,
}

impl Timeline {
    /// Buckets every archived message for `chat_id` under `owner_id`.
    /// `page_size` drives each day's first-page number.
    pub async fn load(
        store: &Store,
        chat_id: i64,
        owner_id: i64,
        tz: FixedOffset,
        page_size: usize,
    ) -> Result<Self> {
        struct DayAcc {
            count: i64,
            first_rank: usize,
        }

        let rows = store.message_dates(chat_id, owner_id).await?;
        let mut buckets: BTreeMap<NaiveDate, (i64, BTreeMap<NaiveDate, DayAcc>)> = BTreeMap::new();

        // Rows arrive in ascending id order, which is also the order
        // pages are filled in, so the running per-month count doubles
        // as the row rank pagination works from.
        for (_, date) in rows {
            let day = date.with_timezone(&tz).date_naive();
            let month = day - Days::new(u64::from(day.day0()));
            let (count, days) = buckets
                .entry(month)
                .or_insert_with(|| (0, BTreeMap::new()));
            *count += 1;
            let rank = *count as usize;
            days.entry(day)
                .or_insert_with(|| DayAcc {
                    count: 0,
                    first_rank: rank,
                })
                .count += 1;
        }

        let mut months = Vec::with_capacity(buckets.len());
        let mut days = BTreeMap::new();
        for (first, (count, day_accs)) in buckets {
            months.push(Month {
                date: first,
                slug: first.format("%Y-%m").to_string(),
                label: first.format("%b %Y").to_string(),
                count,
            });
            let dayline: Vec<Day> = day_accs
                .into_iter()
                .map(|(date, acc)| Day {
                    date,
                    slug: date.format("%Y-%m-%d").to_string(),
                    label: date.format("%d %b %Y").to_string(),
                    count: acc.count,
                    first_page: (acc.first_rank + page_size - 1) / page_size,
                })
                .collect();
            days.insert(first, dayline);
        }
        Ok(Self { tz, months, days })
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    /// Months in chronological order.
    pub fn months(&self) -> &[Month] {
        &self.months
    }

    /// Day buckets for one month, keyed by the month's first day.
    pub fn dayline(&self, month: NaiveDate) -> &[Day] {
        self.days.get(&month).map(Vec::as_slice).unwrap_or(&[])
    }

    /// UTC epoch-second window `[start, end)` covering the local month.
    pub fn month_window(&self, month: NaiveDate) -> (i64, i64) {
        (self.utc_ts(month), self.utc_ts(month + Months::new(1)))
    }

    fn utc_ts(&self, day: NaiveDate) -> i64 {
        let local = NaiveDateTime::new(day, NaiveTime::MIN);
        local.and_utc().timestamp() - i64::from(self.tz.local_minus_utc())
    }
}
